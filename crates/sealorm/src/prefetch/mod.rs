//! Prefetching of relations in follow-up fetches.
//!
//! `rewrite` turns the lookups of a sealed queryset into explicit
//! [`Prefetch`](crate::Prefetch) objects carrying sealed sub-querysets, so the
//! records they produce are sealed too. The `engine` executes lookups with
//! one fetch per relation hop and fills the owners' relation caches.

mod engine;
mod rewrite;


pub use engine::prefetch_related_objects;
pub(crate) use rewrite::normalize;
