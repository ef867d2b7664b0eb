use std::fmt;

use opal_types::{ObjectRef, Value};
use serde::ser::{Error as _, Serialize, Serializer};

use crate::session::Session;

/// Error type returned by population callbacks.
pub type PopulationError = Box<dyn std::error::Error + Send + Sync>;

/// Fills in the properties of a lazily reconstituted object.
///
/// Called with the session and the object being populated. The object is
/// in the [`Handle::Populating`] state for the duration of the call.
pub type ObjectPopulation =
    Box<dyn FnMut(&mut Session, ObjectRef) -> Result<(), PopulationError> + Send>;

/// Produces the real value behind a property-level proxy.
pub type ValuePopulation = Box<dyn FnMut(&mut Session) -> Result<Value, PopulationError> + Send>;

/// Population state of a live object.
pub enum Handle {
    /// Fully populated.
    Real,
    /// Reconstituted without properties; the callback fills them in.
    Pending(ObjectPopulation),
    /// Population is in progress. A trigger in this state returns the
    /// object as it currently stands.
    Populating,
}

impl Handle {
    pub fn is_real(&self) -> bool {
        matches!(self, Handle::Real)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Handle::Pending(_))
    }

    pub fn is_populating(&self) -> bool {
        matches!(self, Handle::Populating)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Real => f.write_str("Real"),
            Handle::Pending(_) => f.write_str("Pending"),
            Handle::Populating => f.write_str("Populating"),
        }
    }
}

pub(crate) enum ProxyState {
    Pending(ValuePopulation),
    Populating,
    /// The owner's property slot holds the real value now.
    Replaced,
}

/// Stand-in for a lazily loaded property value.
///
/// The owner's property slot holds `Value::Proxy(id)` until the proxy is
/// first touched through [`Session::property`] or
/// [`Session::resolve_proxy`]. Population installs the real value into the
/// owner's slot, after which the proxy only forwards to that slot.
pub struct LazyLoadingProxy {
    owner: ObjectRef,
    property: String,
    pub(crate) state: ProxyState,
}

impl LazyLoadingProxy {
    pub fn new(owner: ObjectRef, property: impl Into<String>, populate: ValuePopulation) -> Self {
        Self {
            owner,
            property: property.into(),
            state: ProxyState::Pending(populate),
        }
    }

    pub fn owner(&self) -> ObjectRef {
        self.owner
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    /// Whether the owner's slot has already been replaced by the real value.
    pub fn is_replaced(&self) -> bool {
        matches!(self.state, ProxyState::Replaced)
    }
}

impl fmt::Debug for LazyLoadingProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            ProxyState::Pending(_) => "Pending",
            ProxyState::Populating => "Populating",
            ProxyState::Replaced => "Replaced",
        };
        f.debug_struct("LazyLoadingProxy")
            .field("owner", &self.owner)
            .field("property", &self.property)
            .field("state", &state)
            .finish()
    }
}

/// Proxies are placeholders for data that has not been fetched; writing
/// one out would persist the placeholder rather than the data.
impl Serialize for LazyLoadingProxy {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom(format!(
            "lazy-loading proxy for {}.{} is not serializable",
            self.owner, self.property
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_refuses_serialization() {
        let proxy = LazyLoadingProxy::new(
            ObjectRef::from_raw(1),
            "items",
            Box::new(|_session: &mut Session| Ok(Value::Null)),
        );
        let err = serde_json::to_string(&proxy).unwrap_err();
        assert!(err.to_string().contains("not serializable"));
    }

    #[test]
    fn handle_states() {
        assert!(Handle::Real.is_real());
        assert!(Handle::Populating.is_populating());
        let pending = Handle::Pending(Box::new(|_s: &mut Session, _r| Ok(())));
        assert!(pending.is_pending());
        assert_eq!(format!("{pending:?}"), "Pending");
    }
}
