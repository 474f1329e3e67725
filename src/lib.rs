#![deny(missing_docs)]
#![forbid(unsafe_code)]

//! A private, RFC 7234-conformant HTTP cache decision core.
//!
//! This crate answers one question — given the current time, an outgoing
//! request, and (maybe) a previously stored response for it, what should
//! happen next — and separately carries out the control flow that follows
//! from the answer: issuing the network call, merging a 304, writing a
//! fresh response to the store while still streaming it to the caller, and
//! invalidating entries on unsafe methods.
//!
//! The two halves are [`policy::compute`] (pure, no I/O, easy to test in
//! isolation) and [`interceptor::CacheInterceptor`] (the stateful driver).
//! Storage is an external collaborator behind the [`store::CacheManager`]
//! trait; two concrete implementations ship under [`managers`].
//!
//! This is a *private* cache: `s-maxage` is never consulted, and there is
//! no notion of shared/proxy semantics.

pub mod body;
pub mod clock;
pub mod error;
pub mod headers;
pub mod interceptor;
pub mod managers;
pub mod policy;
pub mod store;

pub use body::{CacheWriter, CacheWritingBody};
pub use clock::{Clock, SystemClock};
pub use error::{CacheError, Result};
pub use headers::CacheControl;
pub use interceptor::{
    CacheInterceptor, Chain, NetworkResponse, ReasonPhrase, ResponseOrigin,
    SentReceived, StrippedResponse,
};
pub use policy::{compute, is_cacheable, Request, Strategy, StoredResponse};
pub use store::{default_cache_key, CacheManager, CacheRequest, StoredEntry};
