//! 协程 (Task) 结构
//!
//! 协程记录保存入口函数、参数、调用者链接以及最近一次切换的结果

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::carrier::CarrierId;
use super::error::{Error, Result};
use super::TaskId;

/// 协程 ID 计数器（0 保留给引导协程）
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// 入口函数参数
pub type Argument = Box<dyn Any + Send>;

/// 入口函数
pub type Entry = Box<dyn FnOnce(Argument) + Send>;

/// 切换结果
///
/// 记录在切换目标上，恢复执行的一方据此得知控制权为何回到自己手中
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    /// 对方主动让出
    Yield = 1,
    /// 对方已结束
    Terminate = 2,
}

impl Action {
    fn from_raw(v: u8) -> Option<Self> {
        match v {
            1 => Some(Action::Yield),
            2 => Some(Action::Terminate),
            _ => None,
        }
    }
}

/// 协程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    /// 已创建，尚未进入
    Created = 0,
    /// 持有运行令牌
    Running = 1,
    /// 切换出去，等待恢复
    Suspended = 2,
    /// 入口函数已返回或已释放
    Terminated = 3,
}

impl From<u8> for TaskStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => TaskStatus::Created,
            1 => TaskStatus::Running,
            2 => TaskStatus::Suspended,
            _ => TaskStatus::Terminated,
        }
    }
}

pub(crate) struct TaskInner {
    id: TaskId,
    /// 引导协程不会被调度到载体上
    bootstrap: bool,
    /// 所属载体（引导协程为 None）
    carrier: Option<CarrierId>,
    status: AtomicU8,
    /// 最近一次切换进来时记录的结果，0 表示从未设置
    action: AtomicU8,
    /// 入口函数及其参数，作为一个整体设置和取出
    routine: Mutex<Option<(Entry, Argument)>>,
    /// 最近一次切换进来的协程（非拥有引用）
    caller: Mutex<Option<Weak<TaskInner>>>,
}

/// 协程句柄
///
/// 克隆句柄不会复制协程，所有句柄指向同一条协程记录
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// 创建新的协程记录
    pub(crate) fn new(carrier: CarrierId) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
                bootstrap: false,
                carrier: Some(carrier),
                status: AtomicU8::new(TaskStatus::Created as u8),
                action: AtomicU8::new(Action::Yield as u8),
                routine: Mutex::new(None),
                caller: Mutex::new(None),
            }),
        }
    }

    /// 创建引导协程（代表线程自身的执行上下文）
    pub(crate) fn new_bootstrap() -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: 0,
                bootstrap: true,
                carrier: None,
                status: AtomicU8::new(TaskStatus::Running as u8),
                action: AtomicU8::new(Action::Terminate as u8),
                routine: Mutex::new(None),
                caller: Mutex::new(None),
            }),
        }
    }

    /// 获取协程 ID
    #[inline]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// 是否为引导协程
    #[inline]
    pub fn is_bootstrap(&self) -> bool {
        self.inner.bootstrap
    }

    #[inline]
    pub(crate) fn carrier(&self) -> Option<CarrierId> {
        self.inner.carrier
    }

    /// 获取协程状态
    #[inline]
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from(self.inner.status.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_status(&self, status: TaskStatus) {
        // 引导协程的状态固定不变
        if !self.inner.bootstrap {
            self.inner.status.store(status as u8, Ordering::Release);
        }
    }

    /// 检查是否已结束
    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.status() == TaskStatus::Terminated
    }

    /// 最近一次切换进来时记录的结果，从未设置时视为 `Terminate`
    #[inline]
    pub fn last_action(&self) -> Action {
        Action::from_raw(self.inner.action.load(Ordering::Acquire)).unwrap_or(Action::Terminate)
    }

    #[inline]
    pub(crate) fn set_last_action(&self, action: Action) {
        self.inner.action.store(action as u8, Ordering::Release);
    }

    /// 设置入口函数及其参数
    ///
    /// 只能在协程首次进入之前设置
    pub fn set_entry<F, A>(&self, entry: F, argument: A) -> Result<()>
    where
        F: FnOnce(Argument) + Send + 'static,
        A: Any + Send,
    {
        if self.inner.bootstrap || self.status() != TaskStatus::Created {
            return Err(Error::AlreadyStarted(self.id()));
        }
        *self.inner.routine.lock() = Some((Box::new(entry), Box::new(argument)));
        Ok(())
    }

    /// 是否已设置入口函数
    pub fn has_entry(&self) -> bool {
        self.inner.routine.lock().is_some()
    }

    /// 取出入口函数和参数，只有第一次调用能拿到
    pub(crate) fn take_entry(&self) -> Option<(Entry, Argument)> {
        self.inner.routine.lock().take()
    }

    /// 获取调用者
    ///
    /// 只有在本协程挂起于自己发起的切换中时才有意义
    pub fn caller(&self) -> Option<Task> {
        self.inner
            .caller
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Task { inner })
    }

    pub(crate) fn set_caller(&self, caller: Option<&Task>) {
        *self.inner.caller.lock() = caller.map(|c| Arc::downgrade(&c.inner));
    }

    pub(crate) fn take_caller(&self) -> Option<Task> {
        self.inner
            .caller
            .lock()
            .take()
            .and_then(|weak| weak.upgrade())
            .map(|inner| Task { inner })
    }

    /// 调用者是否为 `other`
    pub(crate) fn caller_is(&self, other: &Task) -> bool {
        self.inner
            .caller
            .lock()
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(&other.inner)))
    }

    /// 释放协程持有的资源并标记为结束
    pub(crate) fn clear(&self) {
        self.inner.routine.lock().take();
        self.inner.caller.lock().take();
        self.set_status(TaskStatus::Terminated);
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Task {}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("bootstrap", &self.is_bootstrap())
            .field("status", &self.status())
            .field("last_action", &self.last_action())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_new() {
        let task = Task::new(CarrierId::new(1));
        assert_ne!(task.id(), 0);
        assert!(!task.is_bootstrap());
        assert_eq!(task.status(), TaskStatus::Created);
        assert_eq!(task.last_action(), Action::Yield);
        assert!(task.caller().is_none());
        assert!(!task.has_entry());
    }

    #[test]
    fn test_task_ids_unique() {
        let a = Task::new(CarrierId::new(1));
        let b = Task::new(CarrierId::new(1));
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_bootstrap_task() {
        let boot = Task::new_bootstrap();
        assert_eq!(boot.id(), 0);
        assert!(boot.is_bootstrap());
        assert_eq!(boot.last_action(), Action::Terminate);

        // 引导协程状态不可变
        boot.set_status(TaskStatus::Terminated);
        assert_eq!(boot.status(), TaskStatus::Running);
        assert!(boot.set_entry(|_| {}, ()).is_err());
    }

    #[test]
    fn test_unset_action_defaults_to_terminate() {
        let task = Task::new(CarrierId::new(1));
        task.inner.action.store(0, Ordering::Release);
        assert_eq!(task.last_action(), Action::Terminate);
    }

    #[test]
    fn test_take_entry_once() {
        let task = Task::new(CarrierId::new(1));
        task.set_entry(|arg| assert_eq!(arg.downcast_ref::<u32>(), Some(&7)), 7u32)
            .unwrap();
        assert!(task.has_entry());

        let (entry, arg) = task.take_entry().unwrap();
        entry(arg);
        assert!(task.take_entry().is_none());
    }

    #[test]
    fn test_set_entry_replaces_pair() {
        let task = Task::new(CarrierId::new(1));
        task.set_entry(|_| panic!("replaced entry must not run"), 1u32)
            .unwrap();
        task.set_entry(|arg| assert_eq!(arg.downcast_ref::<&str>(), Some(&"second")), "second")
            .unwrap();

        // 入口函数和参数总是成对出现
        let (entry, arg) = task.take_entry().unwrap();
        assert!(arg.downcast_ref::<u32>().is_none());
        entry(arg);
        assert!(!task.has_entry());
    }

    #[test]
    fn test_set_entry_after_start() {
        let task = Task::new(CarrierId::new(1));
        task.set_status(TaskStatus::Running);
        assert!(matches!(
            task.set_entry(|_| {}, ()),
            Err(Error::AlreadyStarted(id)) if id == task.id()
        ));
    }

    #[test]
    fn test_caller_link_is_weak() {
        let task = Task::new(CarrierId::new(1));
        let caller = Task::new(CarrierId::new(1));
        task.set_caller(Some(&caller));
        assert!(task.caller_is(&caller));
        assert_eq!(task.caller(), Some(caller.clone()));

        drop(caller);
        assert!(task.caller().is_none());
    }

    #[test]
    fn test_clear() {
        let task = Task::new(CarrierId::new(1));
        task.set_entry(|_| {}, ()).unwrap();
        task.clear();
        assert!(task.is_terminated());
        assert!(!task.has_entry());
    }
}
