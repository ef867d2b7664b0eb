use opal_types::{BackendResult, Identifier, RawRecord};

/// Where lazy placeholders fetch their full records from.
///
/// `Ok(None)` means the record is not visible to this caller, either
/// because it does not exist or because an access policy hides it.
pub trait RecordSource: Send + Sync {
    fn record_by_identifier(&self, identifier: &Identifier) -> BackendResult<Option<RawRecord>>;
}
