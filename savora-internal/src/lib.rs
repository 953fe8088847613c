pub mod admission; // request quotas and the entitlement gate
pub mod config; // gateway config file
pub mod corpus; // read-only reference recipe corpus
pub mod dedup; // generated-recipe deduplication
pub mod endpoints; // API endpoints
pub mod error; // error handling
pub mod gateway_util; // utilities for gateway
pub mod generator; // external meal content producer
pub mod image_match; // reference image matching
pub mod observability; // logging setup
pub mod similarity; // word-overlap scoring
pub mod store; // document store client
pub mod subscription; // purchase verification and entitlement state
mod testing;
