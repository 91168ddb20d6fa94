use std::str::FromStr;

use serde::Serialize;

use crate::domain::GeoPoint;
use crate::error::TrackerError;

pub const EARTH_RADIUS_KM: f64 = 6371.0088;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, TrackerError> {
        let raw = format!("{min_lon},{min_lat},{max_lon},{max_lat}");
        if !valid_longitude(min_lon)
            || !valid_longitude(max_lon)
            || !valid_latitude(min_lat)
            || !valid_latitude(max_lat)
        {
            return Err(TrackerError::InvalidBoundingBox(raw));
        }
        if min_lon > max_lon || min_lat > max_lat {
            return Err(TrackerError::InvalidBoundingBox(raw));
        }
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    /// Smallest box containing every point within `radius_km` of `center` on
    /// the sphere used by [`haversine_km`]. Falls back to the full longitude
    /// span when the circle reaches a pole or crosses the antimeridian.
    pub fn around(center: GeoPoint, radius_km: f64) -> Self {
        let angular = radius_km / EARTH_RADIUS_KM;
        let dlat = angular.to_degrees();
        let min_lat = (center.latitude - dlat).max(-90.0);
        let max_lat = (center.latitude + dlat).min(90.0);

        // Widest longitude offset of a spherical cap: asin(sin(r/R) / cos(lat)).
        let ratio = angular.sin() / center.latitude.to_radians().cos();
        let (min_lon, max_lon) = if min_lat <= -90.0
            || max_lat >= 90.0
            || !ratio.is_finite()
            || ratio >= 1.0
        {
            (-180.0, 180.0)
        } else {
            let dlon = ratio.asin().to_degrees();
            let west = center.longitude - dlon;
            let east = center.longitude + dlon;
            if west < -180.0 || east > 180.0 {
                (-180.0, 180.0)
            } else {
                (west, east)
            }
        };

        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }
}

impl FromStr for BoundingBox {
    type Err = TrackerError;

    /// `min_lon,min_lat,max_lon,max_lat`
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts = value
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| TrackerError::InvalidBoundingBox(value.to_string()))?;
        match parts.as_slice() {
            [min_lon, min_lat, max_lon, max_lat] => {
                Self::new(*min_lon, *min_lat, *max_lon, *max_lat)
            }
            _ => Err(TrackerError::InvalidBoundingBox(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RadiusFilter {
    pub center: GeoPoint,
    pub radius_km: f64,
}

impl RadiusFilter {
    pub fn new(center: GeoPoint, radius_km: f64) -> Result<Self, TrackerError> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(TrackerError::InvalidRadius(radius_km.to_string()));
        }
        Ok(Self { center, radius_km })
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::around(self.center, self.radius_km)
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        haversine_km(&self.center, point) <= self.radius_km
    }
}

/// Parses `lat,lon` (latitude first, as the map endpoints take it).
pub fn parse_lat_lon(value: &str) -> Result<GeoPoint, TrackerError> {
    let (lat, lon) = value
        .split_once(',')
        .ok_or_else(|| TrackerError::InvalidCoordinate(value.to_string()))?;
    let latitude = lat
        .trim()
        .parse::<f64>()
        .map_err(|_| TrackerError::InvalidCoordinate(value.to_string()))?;
    let longitude = lon
        .trim()
        .parse::<f64>()
        .map_err(|_| TrackerError::InvalidCoordinate(value.to_string()))?;
    if !valid_latitude(latitude) || !valid_longitude(longitude) {
        return Err(TrackerError::InvalidCoordinate(value.to_string()));
    }
    Ok(GeoPoint {
        longitude,
        latitude,
    })
}

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

fn valid_latitude(value: f64) -> bool {
    value.is_finite() && (-90.0..=90.0).contains(&value)
}

fn valid_longitude(value: f64) -> bool {
    value.is_finite() && (-180.0..=180.0).contains(&value)
}
