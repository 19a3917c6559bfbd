//! Multi-provider request routing
//!
//! The key components are:
//!
//! - **Intent inference**: keyword heuristics that guess what a prompt is
//!   about, matched against each backend's declared strengths.
//!
//! - **Ranker**: integer scoring from descriptor and requirements,
//!   stable-sorted, with caller preferences placed first.
//!
//! - **Attempt executor**: one call under a timeout and a child cancellation
//!   token, classified and recorded into the health store.
//!
//! - **Router**: two phases over the ranked list under one attempt budget.
//!
//! ## Example
//!
//! ```rust,ignore
//! use chatrelay_core::routing::{AskOptions, Router};
//!
//! let router = Router::builder().adapters(adapters).health(health).build();
//!
//! let result = router
//!     .ask("Summarize this thread", AskOptions::new().with_max_tokens(512))
//!     .await?;
//! println!("{} answered in {} ms", result.provider_id, result.elapsed_ms);
//! ```

mod executor;
mod intent;
mod ranker;
mod router;
mod types;

pub use executor::{AttemptExecutor, AttemptReport};
pub use intent::infer_intent;
pub use ranker::{CandidateHealth, RankWeights, RankedCandidate, Ranker};
pub use router::{Router, RouterBuilder, RouterConfig};
pub use types::{AskOptions, AttemptTrace, Phase, RouteRequirements, RouterResult};
