use async_trait::async_trait;

use super::Bot;

/// A subroutine's control-flow return value (§4.5, §9 "Exception-as-control-flow").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Cancel every remaining sibling subroutine at this tick's level or
    /// deeper, then continue the loop next tick.
    Skip,
    /// Cancel every task and stop the executor (used by the `leave` command).
    Terminate,
}

#[async_trait]
pub trait Subroutine: Send + Sync {
    fn name(&self) -> &'static str;
    /// Nesting depth, in declared order; all subroutines at level 0 are
    /// top-level siblings (§9 "Cyclic ownership... purely upward-referential").
    fn level(&self) -> usize {
        0
    }
    async fn run(&self, bot: &mut Bot) -> anyhow::Result<Option<Signal>>;
}

/// Runs the Bot's priority-ordered subroutine pipeline once per tick
/// (§4.5 "Executor ordering guarantee").
pub struct RoutinesExecutor {
    routines: Vec<Box<dyn Subroutine>>,
    pub running: bool,
}

impl RoutinesExecutor {
    pub fn new(routines: Vec<Box<dyn Subroutine>>) -> Self {
        RoutinesExecutor { routines, running: true }
    }

    /// Runs every still-scheduled subroutine exactly once, in declared
    /// order, honoring `Skip`/`Terminate` as they're returned.
    pub async fn run_tick(&mut self, bot: &mut Bot) -> anyhow::Result<()> {
        let mut index = 0;
        while index < self.routines.len() {
            let routine = &self.routines[index];
            match routine.run(bot).await {
                Ok(Some(Signal::Terminate)) => {
                    self.running = false;
                    return Ok(());
                }
                Ok(Some(Signal::Skip)) => {
                    let level = routine.level();
                    index += 1;
                    while index < self.routines.len() && self.routines[index].level() >= level {
                        index += 1;
                    }
                    continue;
                }
                Ok(None) => {}
                Err(err) => return Err(err),
            }
            index += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Recording {
        name: &'static str,
        level: usize,
        signal: Option<Signal>,
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Subroutine for Recording {
        fn name(&self) -> &'static str {
            self.name
        }
        fn level(&self) -> usize {
            self.level
        }
        async fn run(&self, _bot: &mut Bot) -> anyhow::Result<Option<Signal>> {
            self.order.lock().unwrap().push(self.name);
            Ok(self.signal)
        }
    }

    #[tokio::test]
    async fn runs_subroutines_in_declared_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let routines: Vec<Box<dyn Subroutine>> = vec![
            Box::new(Recording { name: "a", level: 0, signal: None, order: order.clone() }),
            Box::new(Recording { name: "b", level: 0, signal: None, order: order.clone() }),
        ];
        let mut executor = RoutinesExecutor::new(routines);
        let mut bot = crate::bot::Bot::for_test();
        executor.run_tick(&mut bot).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn skip_cancels_remaining_siblings_this_tick() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let routines: Vec<Box<dyn Subroutine>> = vec![
            Box::new(Recording { name: "a", level: 0, signal: Some(Signal::Skip), order: order.clone() }),
            Box::new(Recording { name: "b", level: 0, signal: None, order: order.clone() }),
            Box::new(Recording { name: "c", level: 0, signal: None, order: order.clone() }),
        ];
        let mut executor = RoutinesExecutor::new(routines);
        let mut bot = crate::bot::Bot::for_test();
        executor.run_tick(&mut bot).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["a"]);
        assert!(executor.running);
    }

    #[tokio::test]
    async fn terminate_stops_the_executor() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let _ = calls.load(Ordering::Relaxed);
        let routines: Vec<Box<dyn Subroutine>> = vec![
            Box::new(Recording { name: "a", level: 0, signal: Some(Signal::Terminate), order: order.clone() }),
            Box::new(Recording { name: "b", level: 0, signal: None, order: order.clone() }),
        ];
        let mut executor = RoutinesExecutor::new(routines);
        let mut bot = crate::bot::Bot::for_test();
        executor.run_tick(&mut bot).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["a"]);
        assert!(!executor.running);
    }
}
