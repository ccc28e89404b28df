//! qcoro：基于载体线程的协作式协程
//!
//! 调用方在当前线程上像同步调用一样进入协程，协程实际运行在该线程专属的载体线程上。
//! 同一调用线程上任一时刻只有一个协程在逻辑上运行。
//!
//! ```no_run
//! use qcoro::{coroutine, Action};
//!
//! let task = coroutine::create_with(|| {
//!     // 把控制权交还给调用方，恢复后从这里继续
//!     coroutine::yield_now().unwrap();
//! })?;
//!
//! assert_eq!(coroutine::enter(&task)?, Action::Yield);
//! assert_eq!(coroutine::enter(&task)?, Action::Terminate);
//! coroutine::release(task)?;
//! # Ok::<(), qcoro::Error>(())
//! ```

pub mod config;
pub mod coroutine;

pub use config::CarrierConfig;
pub use coroutine::{Action, Error, Result, Task, TaskId, TaskStatus};
