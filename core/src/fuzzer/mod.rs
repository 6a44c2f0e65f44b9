//! Grammar-driven payload generation.
//!
//! A [`FuzzingSpec`] names payload classes by single characters; the build
//! logic string picks a class per segment and the seeded generator stitches
//! random candidates together. Output goes to a [`PayloadSink`], which can be
//! a closure, the [`CommandRunner`] or anything else that says when to stop.

pub mod encoding;
pub mod generator;
pub mod runner;
pub mod spec;

pub use encoding::Encoding;
pub use generator::{collect, generate, Flow, PayloadSink};
pub use runner::{CommandRunner, FuzzConfig};
pub use spec::FuzzingSpec;
