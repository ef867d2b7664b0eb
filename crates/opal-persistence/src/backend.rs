use opal_mapper::RecordSource;
use opal_schema::SchemaSet;
use opal_types::{BackendResult, RawRecord};

use crate::change::ChangeSet;
use crate::query::Query;

/// Storage behind a unit of work.
///
/// Reads go through [`RecordSource::record_by_identifier`], which is also
/// what lazy placeholders use to populate themselves.
pub trait Backend: RecordSource {
    /// Called once per manager, before the first commit.
    fn initialize(&self, schemas: &SchemaSet) -> BackendResult<()>;

    /// Applies one classified change set atomically.
    fn commit(&self, changes: &ChangeSet) -> BackendResult<()>;

    /// Records matching `query`, in a stable order.
    fn records_by_query(&self, query: &Query) -> BackendResult<Vec<RawRecord>>;
}
