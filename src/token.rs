//! Service tokens: typed, unique identities for registrable services.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Erased token identity used as the registry key.
///
/// Keys are allocated from a process-wide counter; the debug name never
/// takes part in equality or hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenKey(u64);

impl TokenKey {
    /// Raw numeric id of the key.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Typed identity for a registrable service.
///
/// Two tokens created with the same name are distinct: identity comes from
/// the allocated [`TokenKey`], the name is for diagnostics only.
///
/// # Examples
///
/// ```rust
/// use ferrous_refs::Token;
///
/// let a = Token::<u32>::new("PORT");
/// let b = Token::<u32>::new("PORT");
/// assert_ne!(a, b);
/// assert_eq!(a.name(), b.name());
/// assert_eq!(a, a.clone());
/// ```
pub struct Token<T: ?Sized> {
    key: TokenKey,
    name: &'static str,
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized> Token<T> {
    /// Allocates a fresh token.
    pub fn new(name: &'static str) -> Self {
        Self {
            key: TokenKey(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)),
            name,
            _marker: PhantomData,
        }
    }

    /// Debug name given at creation.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registry key of this token.
    #[inline]
    pub fn key(&self) -> TokenKey {
        self.key
    }

    /// Drops the phantom type, keeping identity and name.
    #[inline]
    pub fn erase(&self) -> AnyToken {
        AnyToken {
            key: self.key,
            name: self.name,
        }
    }
}

impl<T: ?Sized> Clone for Token<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Token<T> {}

impl<T: ?Sized> PartialEq for Token<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T: ?Sized> Eq for Token<T> {}

impl<T: ?Sized> Hash for Token<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({}#{})", self.name, self.key.0)
    }
}

impl<T: ?Sized> fmt::Display for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Type-erased token, used where tokens of different result types are mixed
/// (service bindings, middleware, observers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnyToken {
    key: TokenKey,
    name: &'static str,
}

impl AnyToken {
    pub(crate) fn from_parts(key: TokenKey, name: &'static str) -> Self {
        Self { key, name }
    }

    /// Debug name of the original token.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registry key of the original token.
    #[inline]
    pub fn key(&self) -> TokenKey {
        self.key
    }
}

impl<T: ?Sized> From<&Token<T>> for AnyToken {
    fn from(token: &Token<T>) -> Self {
        token.erase()
    }
}

impl<T: ?Sized> From<Token<T>> for AnyToken {
    fn from(token: Token<T>) -> Self {
        token.erase()
    }
}

impl fmt::Display for AnyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identity_is_key_not_name() {
        let a = Token::<String>::new("SAME");
        let b = Token::<String>::new("SAME");
        assert_ne!(a.key(), b.key());

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        set.insert(a);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn keys_are_monotonic() {
        let a = Token::<u8>::new("A");
        let b = Token::<u8>::new("B");
        assert!(b.key() > a.key());
    }

    #[test]
    fn erase_keeps_identity() {
        let t = Token::<Vec<u8>>::new("BYTES");
        let erased = t.erase();
        assert_eq!(erased.key(), t.key());
        assert_eq!(erased.name(), "BYTES");
        assert_eq!(AnyToken::from(&t), erased);
        assert_eq!(format!("{:?}", t), format!("Token(BYTES#{})", t.key().as_u64()));
    }
}
