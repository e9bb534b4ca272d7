//! Offline evaluation support
//!
//! Scripted stand-ins for every external collaborator of the pipeline, so a
//! full conversation can run without network access or a terminal.
//!
//! # Example
//!
//! ```rust,ignore
//! use ragchat_core::eval::{ScriptedCompletionProvider, ScriptedConsole, StaticSearchService};
//!
//! let provider = Arc::new(ScriptedCompletionProvider::with_texts(["eye exams", "Covered yearly."]));
//! let search = Arc::new(StaticSearchService::with_highlights(&[&["annual eye exam"]]));
//! let mut console = ScriptedConsole::new(["Does my plan cover eye exams?"]);
//!
//! let transcript = ConversationLoop::from_config(&config, provider, search, counter)?
//!     .run(&mut console)
//!     .await?;
//! ```

mod stub;

pub use stub::{
    ScriptedCompletionProvider, ScriptedConsole, StaticSearchService, StubReply, document,
};
