// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
// - 'model/corpus.rs' uses mmap to map a listing into memory

//! # dexpatch
//!
//! Fingerprint-based method resolution and instruction patching for disassembled Dalvik
//! (smali) method corpora.
//!
//! `dexpatch` works on an already-disassembled model of classes, methods and instructions. It
//! locates target methods by structure rather than by name, so patches survive obfuscation and
//! renaming between releases, and it edits their bodies while keeping labels, branch
//! displacements and register frames consistent.
//!
//! ## Features
//!
//! - **Fingerprints** - access flags, type prefixes, class suffix, instruction patterns,
//!   string literals and custom predicates, resolved deterministically and cached
//! - **Transactional edits** - insertions, label-guarded branches and body replacement that
//!   validate before they commit
//! - **Condition gates** - make injected code depend on a runtime settings flag
//! - **Neutralization** - force methods to return a constant, for every overload of a name
//! - **Plans** - describe patches as JSON and apply them from the command line
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dexpatch::prelude::*;
//!
//! let mut corpus = Corpus::from_path("classes.smali")?;
//!
//! // Make every requestAd overload return false
//! Neutralizer::new().block_methods(
//!     &mut corpus,
//!     "Lcom/example/ads/AdClient;",
//!     &["requestAd"],
//!     ReturnSpec::Boolean(false),
//! )?;
//!
//! corpus.write_to("classes.patched.smali")?;
//! # Ok::<(), dexpatch::Error>(())
//! ```
//!
//! ### Resolving and editing
//!
//! ```rust,no_run
//! use dexpatch::prelude::*;
//!
//! let mut corpus = Corpus::from_path("classes.smali")?;
//! let fingerprint = Fingerprint::builder("load-ad")
//!     .returns("V")
//!     .string("ad_unit_id")
//!     .build();
//!
//! let resolver = Resolver::default();
//! let resolution = resolver.require(&fingerprint, &corpus)?;
//!
//! let mut asm = InstructionBuilder::new();
//! asm.return_void()?;
//! resolution.method_mut(&mut corpus)?.edit()?.insert_at(0, asm.finish()?)?;
//! # Ok::<(), dexpatch::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`model`] - opcodes, instructions, descriptors, methods, the corpus and its listing format
//! - [`fingerprint`] - fingerprints, instruction patterns and the caching [`Resolver`]
//! - [`patch`] - the [`patch::InstructionBuilder`], the transactional
//!   [`patch::MethodEditor`] and method validation
//! - [`gate`] - condition gates and flag readers
//! - [`neutralize`] - trivial-return blocking
//! - [`plan`] - JSON patch plans
//! - [`PatchContext`] / [`Patch`] - orchestration of several patches over one corpus
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Failed edits never leave a method half
//! modified: the editor validates a scratch copy and only commits it when it is consistent.
//!
//! ## Concurrency
//!
//! The [`Resolver`] only reads the corpus and is `Sync`; independent fingerprints are resolved
//! on the rayon thread pool. Edits need `&mut Corpus` and are therefore serialised.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use dexpatch::prelude::*;
///
/// let corpus = Corpus::from_path("classes.smali")?;
/// println!("{} methods", corpus.method_count());
/// # Ok::<(), dexpatch::Error>(())
/// ```
pub mod prelude;

/// The disassembled method model and its listing format.
///
/// # Key Types
///
/// - [`model::Corpus`] - every class under patch, addressed through [`model::MethodHandle`]s
/// - [`model::Method`] - a method body with labels and register frame
/// - [`model::Instruction`] - an opcode with validated operands
/// - [`model::Opcode`] / [`model::Format`] - the supported instruction set and its encodings
pub mod model;

pub mod fingerprint;

/// Instruction blocks, transactional method editing and validation.
///
/// # Key Types
///
/// - [`patch::InstructionBuilder`] / [`patch::Block`] - typed instruction sequences
/// - [`patch::MethodEditor`] - splice, replace and remove with label bookkeeping
/// - [`patch::validate_method`] - the consistency check run before every commit
pub mod patch;

pub mod config;
pub mod gate;
pub mod neutralize;
pub mod plan;

mod context;

/// `dexpatch` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
///
/// # Examples
///
/// ```rust,no_run
/// use dexpatch::{Corpus, Result};
///
/// fn load(path: &str) -> Result<Corpus> {
///     Corpus::from_path(path)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `dexpatch` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use dexpatch::{Corpus, Error};
///
/// match Corpus::from_path("classes.smali") {
///     Ok(corpus) => println!("{} classes", corpus.classes().len()),
///     Err(Error::ListingSyntax { line, message }) => println!("line {line}: {message}"),
///     Err(e) => println!("Error: {e}"),
/// }
/// ```
pub use error::Error;

pub use config::{AmbiguityPolicy, EngineConfig};
pub use context::{AppliedPatch, Patch, PatchContext};
pub use fingerprint::{Fingerprint, Resolution, Resolver};
pub use model::{Corpus, Method, MethodHandle};
