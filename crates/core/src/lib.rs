pub mod config;
pub mod extract;
pub mod message;
pub mod mime;
pub mod parser;
pub mod pixel;
pub mod policy;
pub mod rewrite;
pub mod track_domain;
pub mod transformer;
pub mod transformers;

pub use config::*;
pub use extract::*;
pub use message::*;
pub use mime::*;
pub use parser::*;
pub use pixel::*;
pub use policy::*;
pub use rewrite::*;
pub use track_domain::*;
pub use transformer::*;
