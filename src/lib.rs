//! Caching layers for byte streams.
//!
//! Everything in this crate is built around the [`Stream`] trait: a positioned byte stream whose
//! reads and writes take a [`CompletionMode`] bounding how much blocking work a call may do.
//! Two cache engines implement the trait on top of another stream, so they stack freely:
//!
//! - [`BufferedStream`] keeps a fixed number of power-of-two sized chunks of a random-access
//!   stream in memory, evicting the least recently used one on a miss and writing dirty chunks
//!   back before they are reused.
//! - [`CachedFileStream`] stages a sequential source into a local file as it is read, making it
//!   seekable without ever pulling the same byte twice.
//!
//! Transports are adapted with [`MemoryStream`] and the types in [`io`], and any stream can be
//! shared between several owners with [`StreamHandle`].
//!
//! # Example
//!
//! A forward-only reader becomes a seekable, memory-cached stream:
//!
//! ```
//! use stream_cache::io::ReadStream;
//! use stream_cache::{BufferedStream, CompletionMode, Stream};
//!
//! let body: &[u8] = b"a forward-only body";
//! let staged = ReadStream::with_len(body, body.len() as u64).cached()?;
//! let mut stream = BufferedStream::builder(staged)
//!     .with_buffer_size(8)
//!     .with_buffer_count(2)
//!     .build()?;
//!
//! stream.seek(15)?;
//! let mut word = [0u8; 4];
//! stream.read(&mut word, CompletionMode::All)?;
//! assert_eq!(&word, b"body");
//!
//! stream.seek(2)?;
//! stream.read(&mut word, CompletionMode::All)?;
//! assert_eq!(&word, b"forw");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Errors
//!
//! Every fallible operation returns a [`StreamError`]. Cache engines flush or close themselves
//! when dropped; failures at that point can only be logged. Enable the `tracing` feature (on by
//! default) to route them, and a trace of chunk and staging activity, through [`tracing`].
//! Without it they are printed to stderr.
//!
//! [`tracing`]: https://docs.rs/tracing
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

mod common;
mod stream;

pub mod constants;
pub mod io;
pub mod memory;

pub use crate::common::ChunkIndex;
pub use crate::memory::MemoryStream;
pub use crate::stream::{
    BufferSettings, BufferedStream, BufferedStreamBuilder, CacheFileError, CacheSettings,
    CachedFileStream, CachedFileStreamBuilder, CompletionMode, Result, SettingsError, Stream,
    StreamError, StreamHandle,
};
