//! 执行循环 (Trampoline)
//!
//! 在载体线程上调用协程的入口函数，返回后把结束结果交还给调用者

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use super::carrier::Carrier;
use super::context;
use super::task::{Action, Task};

/// 运行一个新协程直到其入口函数返回
///
/// 调用时不能持有载体的互斥锁，入口函数内部可能再次发起切换
pub(crate) fn run(carrier: &Arc<Carrier>, task: Task) {
    let previous = context::set_current(Some(task.clone()));
    debug!(task = task.id(), carrier = %carrier.id(), "coroutine entered");

    let unwind = match task.take_entry() {
        Some((entry, argument)) => panic::catch_unwind(AssertUnwindSafe(|| entry(argument))).err(),
        None => None,
    };
    if unwind.is_some() {
        error!(task = task.id(), "coroutine panicked; propagating to its caller");
    }

    carrier.finish(&task, unwind);
    debug!(task = task.id(), "coroutine terminated");

    match task.take_caller() {
        Some(caller) => {
            if let Err(err) = carrier.switch(&task, &caller, Action::Terminate) {
                error!(task = task.id(), caller = caller.id(), %err, "termination hand-off failed");
                carrier.return_to_owner();
            }
        }
        None => carrier.return_to_owner(),
    }

    context::set_current(previous);
}
