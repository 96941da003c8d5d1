//! Best-effort geoip coordinate lookup.

use crate::solar::Coordinates;

/// External geolocation collaborator. Returns `None` on any failure; absence
/// must never block the control loop.
pub trait GeoLookup: Send {
    fn locate(&self) -> Option<Coordinates>;
}

/// Lookup that is always unavailable.
pub struct NullGeo;

impl GeoLookup for NullGeo {
    fn locate(&self) -> Option<Coordinates> {
        None
    }
}
