//! Reply generation and phrase buffering.

pub mod generator;
#[cfg(feature = "remote")]
pub mod openai;
pub mod phrase;

pub use generator::{FragmentStream, MockGenerator, ReplyGenerator};
#[cfg(feature = "remote")]
pub use openai::{ChatCompletionsConfig, ChatCompletionsGenerator};
pub use phrase::{PhraseBuffer, PhraseChunk};
