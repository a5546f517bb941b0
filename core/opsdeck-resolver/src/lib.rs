//! Component resolver for opsdeck toolkit UI panels.
//!
//! Given a toolkit record, [`ComponentResolver`] tries an ordered list of
//! [`Source`]s (the development source tree first when configured, the
//! installed asset last) and memoizes the result under a key derived from the
//! record, so a reinstall or entry change busts the cache.

mod error;
mod fetch;
mod resolver;
mod source;

pub use error::{Attempt, FetchError, LoadFailure};
pub use fetch::{DefaultFetcher, SourceFetcher};
pub use resolver::{CacheState, ComponentResolver, Resolution};
pub use source::{candidates, CacheKey, Candidate, ComponentRef, ResolverConfig, Source};
