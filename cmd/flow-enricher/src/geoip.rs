//! GeoIP lookups against the MaxMind city and ASN databases.

use std::net::IpAddr;

use log::debug;
use maxminddb::{geoip2, MaxMindDBError, Reader};

/// Result of a GeoIP lookup; unresolvable fields stay empty.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GeoResult {
    pub country: String,
    pub city: String,
    pub as_num: u32,
    pub as_name: String,
}

/// Read-only handles to the city and ASN databases. The handles live for the
/// process lifetime and are released on drop during shutdown.
pub struct GeoIpReader {
    city_db: Reader<Vec<u8>>,
    asn_db: Reader<Vec<u8>>,
}

impl GeoIpReader {
    pub fn open(city_db_path: &str, asn_db_path: &str) -> Result<Self, MaxMindDBError> {
        let city_db = Reader::open_readfile(city_db_path)?;
        let asn_db = Reader::open_readfile(asn_db_path)?;
        Ok(Self { city_db, asn_db })
    }

    pub fn lookup(&self, ip: IpAddr) -> GeoResult {
        let mut result = GeoResult::default();

        match self.city_db.lookup::<geoip2::City>(ip) {
            Ok(city) => {
                if let Some(country) = city.country.and_then(|c| c.iso_code) {
                    result.country = country.to_string();
                }
                if let Some(name) = city
                    .city
                    .and_then(|c| c.names)
                    .and_then(|names| names.get("en").copied())
                {
                    result.city = name.to_string();
                }
            }
            Err(e) => debug!("city lookup failed for {ip}: {e}"),
        }

        match self.asn_db.lookup::<geoip2::Asn>(ip) {
            Ok(asn) => {
                result.as_num = asn.autonomous_system_number.unwrap_or(0);
                if let Some(org) = asn.autonomous_system_organization {
                    result.as_name = org.to_string();
                }
            }
            Err(e) => debug!("ASN lookup failed for {ip}: {e}"),
        }

        result
    }
}
