//! Circular dependency detection infrastructure.
//!
//! Synchronous resolution never yields, so its stack lives in a thread-local.
//! Async factories run inside a task-local chain that follows the task
//! across threads and suspension points.

use std::cell::RefCell;
use std::future::Future;

use crate::error::{DiError, DiResult};
use crate::token::TokenKey;

pub(crate) const MAX_DEPTH: usize = 1024;

/// One in-progress construction: which scope is building which token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Frame {
    pub(crate) scope: u64,
    pub(crate) key: TokenKey,
    pub(crate) name: &'static str,
}

impl Frame {
    #[inline]
    fn same_target(&self, other: &Frame) -> bool {
        self.scope == other.scope && self.key == other.key
    }
}

thread_local! {
    static RESOLUTION_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static ASYNC_CHAIN: Vec<Frame>;
}

fn cycle_path(frames: &[Frame], repeated: &'static str) -> Vec<&'static str> {
    let mut path: Vec<&'static str> = frames.iter().map(|f| f.name).collect();
    path.push(repeated);
    path
}

/// Guard for the thread-local resolution stack. Pops its frame on drop, so
/// the stack unwinds on success, error and panic alike.
pub(crate) struct StackGuard {
    frame: Frame,
}

impl StackGuard {
    /// Pushes `frame`, failing if the same scope is already building the
    /// same token on this thread.
    pub(crate) fn enter(frame: Frame) -> DiResult<Self> {
        RESOLUTION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|f| f.same_target(&frame)) {
                return Err(DiError::CircularDependency(cycle_path(&stack, frame.name)));
            }
            if stack.len() >= MAX_DEPTH {
                return Err(DiError::DepthExceeded(stack.len()));
            }
            stack.push(frame);
            Ok(Self { frame })
        })
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        // try_with: may run during thread-local teardown
        let _ = RESOLUTION_STACK.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|f| *f == self.frame) {
                stack.truncate(pos);
            }
        });
    }
}

/// Current thread's stack depth.
#[cfg(test)]
pub(crate) fn depth() -> usize {
    RESOLUTION_STACK.with(|stack| stack.borrow().len())
}

/// Extends the current task's async chain with `frame`, or reports the cycle.
pub(crate) fn extend_async_chain(frame: Frame) -> DiResult<Vec<Frame>> {
    let mut chain = ASYNC_CHAIN.try_with(|chain| chain.clone()).unwrap_or_default();
    if chain.iter().any(|f| f.same_target(&frame)) {
        return Err(DiError::CircularDependency(cycle_path(&chain, frame.name)));
    }
    if chain.len() >= MAX_DEPTH {
        return Err(DiError::DepthExceeded(chain.len()));
    }
    chain.push(frame);
    Ok(chain)
}

/// Runs `fut` with `chain` as the task's async resolution chain.
pub(crate) async fn within_async_chain<F: Future>(chain: Vec<Frame>, fut: F) -> F::Output {
    ASYNC_CHAIN.scope(chain, fut).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    fn frame(scope: u64, token: &Token<u8>) -> Frame {
        Frame {
            scope,
            key: token.key(),
            name: token.name(),
        }
    }

    #[test]
    fn detects_repeat_in_same_scope() {
        let a = Token::<u8>::new("A");
        let b = Token::<u8>::new("B");

        let _ga = StackGuard::enter(frame(1, &a)).unwrap();
        let _gb = StackGuard::enter(frame(1, &b)).unwrap();
        match StackGuard::enter(frame(1, &a)) {
            Err(DiError::CircularDependency(path)) => assert_eq!(path, vec!["A", "B", "A"]),
            _ => panic!("expected a cycle"),
        }
    }

    #[test]
    fn same_token_in_other_scope_is_not_a_cycle() {
        let a = Token::<u8>::new("A");
        let _outer = StackGuard::enter(frame(1, &a)).unwrap();
        let inner = StackGuard::enter(frame(2, &a));
        assert!(inner.is_ok());
    }

    #[test]
    fn guards_pop_on_drop() {
        let a = Token::<u8>::new("A");
        let before = depth();
        {
            let _g = StackGuard::enter(frame(7, &a)).unwrap();
            assert_eq!(depth(), before + 1);
        }
        assert_eq!(depth(), before);
        assert!(StackGuard::enter(frame(7, &a)).is_ok());
    }

    #[test]
    fn guard_pops_during_unwind() {
        let a = Token::<u8>::new("A");
        let before = depth();
        let result = std::panic::catch_unwind(|| {
            let _g = StackGuard::enter(frame(3, &a)).unwrap();
            panic!("factory exploded");
        });
        assert!(result.is_err());
        assert_eq!(depth(), before);
    }

    #[test]
    fn depth_is_capped() {
        let tokens: Vec<Token<u8>> = (0..MAX_DEPTH + 1).map(|_| Token::new("LINK")).collect();
        let mut guards = Vec::new();
        let mut failure = None;
        for token in &tokens {
            match StackGuard::enter(frame(9, token)) {
                Ok(guard) => guards.push(guard),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        assert!(matches!(failure, Some(DiError::DepthExceeded(MAX_DEPTH))));
        drop(guards);
        assert_eq!(depth(), 0);
    }

    #[tokio::test]
    async fn async_chain_detects_repeat() {
        let a = Token::<u8>::new("A");
        let b = Token::<u8>::new("B");

        let chain = extend_async_chain(frame(1, &a)).unwrap();
        let result = within_async_chain(chain, async {
            let chain = extend_async_chain(frame(1, &b)).unwrap();
            within_async_chain(chain, async { extend_async_chain(frame(1, &a)) }).await
        })
        .await;

        match result {
            Err(DiError::CircularDependency(path)) => assert_eq!(path, vec!["A", "B", "A"]),
            _ => panic!("expected a cycle"),
        }
        assert_eq!(extend_async_chain(frame(1, &a)).unwrap().len(), 1);
    }
}
