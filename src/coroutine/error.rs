//! 协程错误定义
//!
//! 参考实现中属于未定义行为的误用，这里都升级为可检查的错误

use std::io;

use super::TaskId;

/// 协程操作错误
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 载体线程创建失败，没有可降级的路径
    #[error("failed to spawn carrier thread")]
    Spawn(#[source] io::Error),

    #[error("coroutine {0} cannot switch to itself")]
    SelfSwitch(TaskId),

    /// 协程属于另一个线程的载体
    #[error("coroutine {0} belongs to another thread's carrier")]
    ForeignTask(TaskId),

    /// 发起切换的协程并未持有运行令牌
    #[error("coroutine {0} does not hold the running token")]
    NotCurrent(TaskId),

    #[error("coroutine {0} has already terminated")]
    Terminated(TaskId),

    /// 协程挂起在另一个协程的栈帧之下
    #[error("coroutine {task} is suspended beneath coroutine {top} on the carrier")]
    Buried { task: TaskId, top: TaskId },

    #[error("no carrier has been started on this thread")]
    NoCarrier,

    #[error("coroutine {0} has no caller to yield to")]
    NoCaller(TaskId),

    /// 协程仍在运行或挂起，不能释放
    #[error("coroutine {0} is still running or suspended")]
    Busy(TaskId),

    #[error("the bootstrap coroutine cannot be released")]
    ReleaseBootstrap,

    #[error("coroutine {0} has already started")]
    AlreadyStarted(TaskId),

    /// 载体已启动，配置不再生效
    #[error("the carrier of this thread is already running")]
    CarrierRunning,

    #[error("invalid carrier configuration: {0}")]
    InvalidConfig(String),
}

/// 协程操作结果
pub type Result<T, E = Error> = std::result::Result<T, E>;
