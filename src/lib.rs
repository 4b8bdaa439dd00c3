//! postseek - semantic search over exported social media posts.
//!
//! postseek loads a delimited corpus export, drops posts without meaningful
//! text, recovers missing author identities from page ids and URLs, and
//! stores one sentence embedding per post in a local
//! [redb](https://github.com/cberner/redb) database. Queries are embedded
//! with the same model and ranked by cosine similarity, optionally filtered
//! by profile and interaction count and re-ranked by engagement.
//!
//! # Quick start
//!
//! ```no_run
//! use postseek::{CollectionDb, DataDir, ModelManager};
//! use postseek::search::{self, SearchParams};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let store = CollectionDb::open(&data_dir.index_db()).unwrap();
//! let mut model = ModelManager::new();
//!
//! let params = SearchParams {
//!     profile: Some("Some Profile".to_string()),
//!     boost_interactions: true,
//!     ..SearchParams::new("climate policy", "posts")
//! };
//!
//! let results = search::execute_search(&params, &store, &mut model).unwrap();
//! for r in &results {
//!     println!("{} ({:.3}): {}", r.metadata.profile, r.rank_score(), r.text);
//! }
//! ```

pub mod cli;
pub mod collection_db;
pub mod config_db;
pub mod corpus;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod identity;
pub mod index_builder;
pub mod model_manager;
pub mod qualifier;
pub mod search;
pub mod vector_store;

pub use collection_db::CollectionDb;
pub use config_db::ConfigDb;
pub use corpus::{CleanPost, LoadStats, RawRecord};
pub use data_dir::DataDir;
pub use embedding::Embedder;
pub use error::{Error, Result};
pub use model_manager::ModelManager;
pub use vector_store::{InMemoryStore, VectorStore};
