//! 载体 (Carrier)
//!
//! 每个调用线程一个专用的后台线程，加上一个由互斥锁和条件变量保护的令牌槽。
//! 令牌在拥有者线程与载体线程之间严格交替传递：
//! - 槽为空：拥有者线程上的当前协程（通常是引导协程）持有控制权
//! - 槽非空：槽中的协程持有控制权，在载体线程上运行
//!
//! 载体线程本身也是一个普通线程：在其上运行的协程再创建协程时，
//! 会为载体线程启动一个子载体。

use std::any::Any;
use std::fmt;
use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use super::context;
use super::error::{Error, Result};
use super::task::{Action, Task, TaskStatus};
use super::trampoline;
use crate::config::CarrierConfig;

/// 载体 ID 计数器
static NEXT_CARRIER_ID: AtomicU64 = AtomicU64::new(1);

/// 载体 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CarrierId(u64);

impl CarrierId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 拥有者线程一侧
pub(crate) struct Owner {
    /// 拥有者线程的引导协程
    pub(crate) bootstrap: Task,
    /// 拥有者线程若本身是载体线程，记录它所服务的载体
    pub(crate) home: Option<CarrierId>,
}

impl Owner {
    /// `task` 是否运行在拥有者线程上
    fn contains(&self, task: &Task) -> bool {
        *task == self.bootstrap || (task.carrier().is_some() && task.carrier() == self.home)
    }
}

/// 令牌槽，只能在持有互斥锁时访问
struct Slot {
    /// 持有令牌的协程，None 表示令牌在拥有者线程手中
    active: Option<Task>,
    /// 拥有者线程上发起进入、正在等待令牌归还的协程
    waiter: Option<Task>,
    /// 入口函数栈帧位于载体线程栈上的协程（栈底在前）
    frames: Vec<Task>,
    /// 入口函数抛出的 panic，交给下一个拿到令牌的一方重新抛出
    unwind: Option<Box<dyn Any + Send>>,
    /// 拥有者线程已退出
    shutdown: bool,
}

/// 载体
pub(crate) struct Carrier {
    id: CarrierId,
    owner: Owner,
    slot: Mutex<Slot>,
    /// 槽被占用时通知载体线程
    granted: Condvar,
    /// 槽被清空时通知拥有者线程
    returned: Condvar,
}

impl Carrier {
    /// 创建载体并启动其专用线程
    pub(crate) fn spawn(config: &CarrierConfig, owner: Owner) -> Result<Arc<Self>> {
        let carrier = Arc::new(Self {
            id: CarrierId::new(NEXT_CARRIER_ID.fetch_add(1, Ordering::Relaxed)),
            owner,
            slot: Mutex::new(Slot {
                active: None,
                waiter: None,
                frames: Vec::new(),
                unwind: None,
                shutdown: false,
            }),
            granted: Condvar::new(),
            returned: Condvar::new(),
        });

        let worker = Arc::clone(&carrier);
        let inherited = config.clone();
        thread::Builder::new()
            .name(format!("{}-{}", config.name_prefix, carrier.id))
            .stack_size(config.stack_size)
            .spawn(move || worker.run_loop(inherited))
            .map_err(Error::Spawn)?;

        debug!(
            carrier = %carrier.id,
            parent = ?carrier.owner.home.map(|id| id.0),
            stack_size = config.stack_size,
            "carrier started"
        );
        Ok(carrier)
    }

    #[inline]
    pub(crate) fn id(&self) -> CarrierId {
        self.id
    }

    /// 载体线程主循环
    fn run_loop(self: Arc<Self>, config: CarrierConfig) {
        context::serve(Arc::clone(&self), config);

        let mut slot = self.slot.lock();
        self.wait_on_carrier(&mut slot, None);

        let suspended = slot.frames.len();
        drop(slot);
        debug!(carrier = %self.id, suspended, "carrier stopped");
    }

    /// 在载体线程上等待令牌
    ///
    /// `me` 为 None 时是主循环：只启动新协程，直到收到停止信号。
    /// 否则等待令牌回到 `me`；等待期间被授予令牌的新协程在当前栈上嵌套运行。
    fn wait_on_carrier(self: &Arc<Self>, slot: &mut MutexGuard<'_, Slot>, me: Option<&Task>) {
        loop {
            let fresh = match slot.active.as_ref() {
                Some(active) if me == Some(active) => return,
                Some(active) if active.status() == TaskStatus::Created => Some(active.clone()),
                None if me.is_none() && slot.shutdown => return,
                _ => None,
            };

            match fresh {
                Some(task) => {
                    task.set_status(TaskStatus::Running);
                    slot.frames.push(task.clone());
                    MutexGuard::unlocked(slot, || trampoline::run(self, task));
                }
                None => self.granted.wait(slot),
            }
        }
    }

    /// 拥有者线程进入本载体上的协程，阻塞直到令牌归还
    ///
    /// `from` 是拥有者线程上的当前协程，返回其上最近一次记录的结果
    pub(crate) fn enter(&self, from: &Task, to: &Task, action: Action) -> Result<Action> {
        let mut slot = self.slot.lock();
        if slot.active.is_some() {
            return Err(Error::NotCurrent(from.id()));
        }
        Self::check_target(&slot, to)?;

        trace!(carrier = %self.id, from = from.id(), to = to.id(), ?action, "enter");
        Self::link(from, to, action);
        from.set_status(TaskStatus::Suspended);
        slot.waiter = Some(from.clone());
        self.grant(&mut slot, to);

        while slot.active.is_some() {
            self.returned.wait(&mut slot);
        }
        slot.waiter = None;
        from.set_status(TaskStatus::Running);
        Self::resume(slot, from)
    }

    /// 在载体线程上从持有令牌的 `from` 切换到 `to`
    ///
    /// `to` 可以是同一载体上的协程，也可以是正在等待的拥有者一侧协程。
    /// 已结束的 `from` 交出令牌后立即返回。
    pub(crate) fn switch(self: &Arc<Self>, from: &Task, to: &Task, action: Action) -> Result<Action> {
        let mut slot = self.slot.lock();
        if slot.active.as_ref() != Some(from) {
            return Err(Error::NotCurrent(from.id()));
        }

        if self.is_local(to) {
            Self::check_target(&slot, to)?;
        } else if slot.waiter.as_ref() != Some(to) {
            return Err(match slot.waiter.as_ref() {
                Some(waiter) if self.owner.contains(to) => Error::Buried {
                    task: to.id(),
                    top: waiter.id(),
                },
                _ => Error::ForeignTask(to.id()),
            });
        }

        trace!(carrier = %self.id, from = from.id(), to = to.id(), ?action, "switch");
        Self::link(from, to, action);

        let finished = from.is_terminated();
        if !finished {
            from.set_status(TaskStatus::Suspended);
        }
        self.grant(&mut slot, to);

        // 已结束的协程不会再被恢复
        if finished {
            return Ok(Action::Terminate);
        }

        self.wait_on_carrier(&mut slot, Some(from));
        from.set_status(TaskStatus::Running);
        Self::resume(slot, from)
    }

    /// `to` 是否运行在本载体上
    #[inline]
    fn is_local(&self, to: &Task) -> bool {
        to.carrier() == Some(self.id)
    }

    /// 检查本载体上的 `to` 能否获得令牌
    fn check_target(slot: &Slot, to: &Task) -> Result<()> {
        match to.status() {
            TaskStatus::Terminated => Err(Error::Terminated(to.id())),
            TaskStatus::Suspended => match slot.frames.last().filter(|top| *top != to) {
                Some(top) => Err(Error::Buried {
                    task: to.id(),
                    top: top.id(),
                }),
                None => Ok(()),
            },
            TaskStatus::Created | TaskStatus::Running => Ok(()),
        }
    }

    /// 记录切换结果并维护调用者链接
    fn link(from: &Task, to: &Task, action: Action) {
        if action == Action::Yield {
            if from.caller_is(to) {
                // 回到进入自己的一方
                from.set_caller(None);
            } else if !to.is_bootstrap() {
                to.set_caller(Some(from));
            }
        }
        to.set_last_action(action);
    }

    /// 把令牌交给 `to`（拥有者一侧对应清空槽）并通知等待方
    fn grant(&self, slot: &mut Slot, to: &Task) {
        if self.is_local(to) {
            if to.status() == TaskStatus::Suspended {
                to.set_status(TaskStatus::Running);
            }
            slot.active = Some(to.clone());
            self.granted.notify_one();
        } else {
            slot.active = None;
            self.returned.notify_one();
        }
    }

    /// 令牌回到 `from` 之后：恢复当前协程，转发 panic
    fn resume(mut slot: MutexGuard<'_, Slot>, from: &Task) -> Result<Action> {
        let unwind = slot.unwind.take();
        drop(slot);

        context::set_current(Some(from.clone()));
        if let Some(payload) = unwind {
            panic::resume_unwind(payload);
        }
        Ok(from.last_action())
    }

    /// 协程入口函数返回后调用：弹出栈帧，保存 panic
    pub(crate) fn finish(&self, task: &Task, unwind: Option<Box<dyn Any + Send>>) {
        let mut slot = self.slot.lock();
        task.set_status(TaskStatus::Terminated);
        if let Some(pos) = slot.frames.iter().rposition(|t| t == task) {
            slot.frames.remove(pos);
        }
        if unwind.is_some() {
            slot.unwind = unwind;
        }
    }

    /// 没有调用者可交接时，把令牌直接还给拥有者线程
    pub(crate) fn return_to_owner(&self) {
        let mut slot = self.slot.lock();
        slot.active = None;
        self.returned.notify_one();
    }

    /// 拥有者线程退出时调用
    pub(crate) fn shutdown(&self) {
        let mut slot = self.slot.lock();
        slot.shutdown = true;
        if !slot.frames.is_empty() {
            warn!(
                carrier = %self.id,
                suspended = slot.frames.len(),
                "owner exited with suspended coroutines; carrier stays parked"
            );
        }
        self.granted.notify_one();
    }
}

impl fmt::Debug for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("Carrier")
            .field("id", &self.id)
            .field("active", &slot.active.as_ref().map(Task::id))
            .field("waiter", &slot.waiter.as_ref().map(Task::id))
            .field("frames", &slot.frames.len())
            .field("shutdown", &slot.shutdown)
            .finish()
    }
}
