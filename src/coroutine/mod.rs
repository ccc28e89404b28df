//! 协程模块
//!
//! 基于载体线程实现的协作式协程：调用方像同步调用一样进入协程，
//! 协程实际运行在每个调用线程专属的载体线程上，二者之间严格交替持有运行令牌。
//! 载体线程也是调用线程：在协程内创建的协程运行在它的子载体上。
//!
//! 核心组件：
//! - Task: 协程记录（入口函数、参数、调用者、最近一次切换结果）
//! - Carrier: 载体线程 + 令牌槽（互斥锁/条件变量）
//! - Trampoline: 在载体上运行入口函数，结束后把控制权交还调用者
//! - Context: 线程本地的"当前协程"访问器

mod carrier;
mod context;
mod error;
mod task;
mod trampoline;

pub use error::{Error, Result};
pub use task::{Action, Argument, Entry, Task, TaskStatus};

use crate::config::CarrierConfig;

/// 协程 ID 类型（0 保留给引导协程）
pub type TaskId = u64;

/// 创建一个新协程
///
/// 本线程还没有载体时会先启动载体线程；启动失败属于不可恢复的错误。
/// 新协程没有入口函数，需要通过 [`Task::set_entry`] 设置。
pub fn create() -> Result<Task> {
    let carrier = context::carrier_or_spawn()?;
    Ok(Task::new(carrier.id()))
}

/// 创建协程并设置入口函数
pub fn create_with<F>(f: F) -> Result<Task>
where
    F: FnOnce() + Send + 'static,
{
    let task = create()?;
    task.set_entry(move |_| f(), ())?;
    Ok(task)
}

/// 释放协程
///
/// 正在运行或挂起中的协程、引导协程、其他线程的协程都不能释放
pub fn release(task: Task) -> Result<()> {
    if task.is_bootstrap() {
        return Err(Error::ReleaseBootstrap);
    }
    if !is_local(&task) {
        return Err(Error::ForeignTask(task.id()));
    }
    match task.status() {
        TaskStatus::Running | TaskStatus::Suspended => Err(Error::Busy(task.id())),
        TaskStatus::Created | TaskStatus::Terminated => {
            task.clear();
            Ok(())
        }
    }
}

/// `task` 是否属于本线程：本线程的引导协程，或本线程拥有/服务的载体上的协程
fn is_local(task: &Task) -> bool {
    if task.is_bootstrap() {
        return *task == context::bootstrap();
    }
    [context::carrier(), context::serving()]
        .into_iter()
        .flatten()
        .any(|carrier| task.carrier() == Some(carrier.id()))
}

/// 当前线程上正在运行的协程
///
/// 尚未进入任何协程时返回本线程的引导协程
pub fn current() -> Task {
    context::current()
}

/// 是否处于协程中（当前协程不是引导协程）
pub fn in_coroutine() -> bool {
    !current().is_bootstrap()
}

/// 从 `from` 切换到 `to`
///
/// 同步阻塞直到控制权回到 `from`，返回 `from` 上最近一次记录的结果：
/// 对方让出时为 [`Action::Yield`]，对方结束时为 [`Action::Terminate`]。
pub fn switch(from: &Task, to: &Task, action: Action) -> Result<Action> {
    if from == to {
        return Err(Error::SelfSwitch(from.id()));
    }
    if *from != context::current() {
        return Err(if is_local(from) {
            Error::NotCurrent(from.id())
        } else {
            Error::ForeignTask(from.id())
        });
    }

    // 进入本线程载体上的协程
    if let Some(own) = context::carrier().filter(|c| to.carrier() == Some(c.id())) {
        return own.enter(from, to, action);
    }

    // 在载体线程上：同一载体上的协程，或正在等待的拥有者一侧
    if let Some(serving) = context::serving() {
        return serving.switch(from, to, action);
    }

    Err(if to.is_bootstrap() && context::carrier().is_none() {
        Error::NoCarrier
    } else {
        Error::ForeignTask(to.id())
    })
}

/// 进入（或恢复）协程，等价于 `switch(current(), task, Yield)`
pub fn enter(task: &Task) -> Result<Action> {
    switch(&current(), task, Action::Yield)
}

/// 让出当前协程，把控制权交还给进入它的一方
pub fn yield_now() -> Result<Action> {
    let me = current();
    let caller = me.caller().ok_or(Error::NoCaller(me.id()))?;
    switch(&me, &caller, Action::Yield)
}

/// 设置本线程载体的配置，必须在本线程第一次 [`create`] 之前调用
pub fn configure_carrier(config: CarrierConfig) -> Result<()> {
    context::configure(config)
}
