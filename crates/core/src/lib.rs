pub mod error;
pub mod ids;
pub mod lookup;
pub mod model;
pub mod record;
pub mod static_sources;

pub use error::CoreError;
pub use ids::*;
pub use lookup::{
    LookupFieldRelation, LookupSource, RelationId, SourceDeclaration, SourceId, SourceKind,
    SourceTarget,
};
pub use model::*;
pub use record::{CanonicalData, EnrichedValue, Fingerprint, FormRecord};
