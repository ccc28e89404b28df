//! 线程本地上下文
//!
//! 记录"当前线程上正在运行的协程"，以及本线程的引导协程、载体和配置。
//! 载体线程同样拥有一份独立的上下文：它所服务的载体记录在 `serving` 中，
//! 在其上运行的协程再创建协程时，由载体线程自己的载体（子载体）承载。

use std::cell::RefCell;
use std::sync::Arc;

use tracing::debug;

use super::carrier::{Carrier, Owner};
use super::error::{Error, Result};
use super::task::Task;
use crate::config::CarrierConfig;

/// 每个线程一份的协程上下文
struct Context {
    bootstrap: Task,
    /// None 表示当前就是引导协程
    current: Option<Task>,
    /// 本线程拥有的载体，首次创建协程时启动
    carrier: Option<Arc<Carrier>>,
    /// 本线程作为载体线程所服务的载体
    serving: Option<Arc<Carrier>>,
    config: CarrierConfig,
}

impl Context {
    fn new() -> Self {
        Self {
            bootstrap: Task::new_bootstrap(),
            current: None,
            carrier: None,
            serving: None,
            config: CarrierConfig::default(),
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // 载体线程退出时同样会停止它的子载体
        if let Some(carrier) = self.carrier.take() {
            debug!(carrier = %carrier.id(), "owner thread exiting, stopping carrier");
            carrier.shutdown();
        }
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// 访问当前线程的上下文，首次访问时初始化
///
/// 闭包内不能发生协程切换
fn with_context<F, R>(f: F) -> R
where
    F: FnOnce(&mut Context) -> R,
{
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        f(ctx.get_or_insert_with(Context::new))
    })
}

/// 载体线程启动时调用，登记它所服务的载体，子载体沿用拥有者的配置
pub(crate) fn serve(carrier: Arc<Carrier>, config: CarrierConfig) {
    with_context(|ctx| {
        ctx.serving = Some(carrier);
        ctx.config = config;
    });
}

/// 当前协程，尚未进入任何协程时返回引导协程
pub(crate) fn current() -> Task {
    with_context(|ctx| ctx.current.clone().unwrap_or_else(|| ctx.bootstrap.clone()))
}

/// 设置当前协程，返回之前的值
pub(crate) fn set_current(task: Option<Task>) -> Option<Task> {
    with_context(|ctx| {
        let task = task.filter(|t| !t.is_bootstrap());
        std::mem::replace(&mut ctx.current, task)
    })
}

/// 本线程的引导协程
pub(crate) fn bootstrap() -> Task {
    with_context(|ctx| ctx.bootstrap.clone())
}

/// 本线程拥有的载体
pub(crate) fn carrier() -> Option<Arc<Carrier>> {
    with_context(|ctx| ctx.carrier.clone())
}

/// 本线程作为载体线程所服务的载体
pub(crate) fn serving() -> Option<Arc<Carrier>> {
    with_context(|ctx| ctx.serving.clone())
}

/// 获取或启动本线程的载体
pub(crate) fn carrier_or_spawn() -> Result<Arc<Carrier>> {
    with_context(|ctx| {
        if let Some(carrier) = &ctx.carrier {
            return Ok(Arc::clone(carrier));
        }
        let owner = Owner {
            bootstrap: ctx.bootstrap.clone(),
            home: ctx.serving.as_ref().map(|c| c.id()),
        };
        let carrier = Carrier::spawn(&ctx.config, owner)?;
        ctx.carrier = Some(Arc::clone(&carrier));
        Ok(carrier)
    })
}

/// 替换本线程的载体配置，载体启动后不可再修改
pub(crate) fn configure(config: CarrierConfig) -> Result<()> {
    config.validate()?;
    with_context(|ctx| {
        if ctx.carrier.is_some() {
            return Err(Error::CarrierRunning);
        }
        ctx.config = config;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::carrier::CarrierId;
    use std::thread;

    #[test]
    fn test_fresh_thread_is_bootstrap() {
        thread::spawn(|| {
            let me = current();
            assert!(me.is_bootstrap());
            assert_eq!(me, bootstrap());
            assert!(carrier().is_none());
            assert!(serving().is_none());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_bootstrap_is_per_thread() {
        let here = bootstrap();
        let there = thread::spawn(bootstrap).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_set_current_restores() {
        let task = Task::new(CarrierId::new(99));
        let prev = set_current(Some(task.clone()));
        assert!(prev.is_none());
        assert_eq!(current(), task);

        let prev = set_current(prev);
        assert_eq!(prev, Some(task));
        assert!(current().is_bootstrap());
    }

    #[test]
    fn test_set_current_ignores_bootstrap() {
        set_current(Some(bootstrap()));
        assert!(current().is_bootstrap());
        assert!(set_current(None).is_none());
    }

    #[test]
    fn test_carrier_thread_has_own_context() {
        thread::spawn(|| {
            let owner_bootstrap = bootstrap();
            let carrier = carrier_or_spawn().unwrap();
            assert!(serving().is_none());

            let seen = Arc::new(parking_lot::Mutex::new(None));
            let task = Task::new(carrier.id());
            let sink = Arc::clone(&seen);
            task.set_entry(
                move |_| {
                    let inner = bootstrap();
                    let serving = serving().map(|c| c.id());
                    *sink.lock() = Some((inner, serving));
                },
                (),
            )
            .unwrap();
            carrier
                .enter(&owner_bootstrap, &task, crate::coroutine::Action::Yield)
                .unwrap();

            let (inner, serving) = seen.lock().take().unwrap();
            assert_ne!(inner, owner_bootstrap);
            assert_eq!(serving, Some(carrier.id()));
        })
        .join()
        .unwrap();
    }
}
