//! Applies device metadata and GeoIP context to raw flow records.

use std::net::IpAddr;
use std::sync::Arc;

use log::debug;

use crate::cache::DeviceCache;
use crate::flow::flowpb::EnrichedFlow;
use crate::geoip::GeoIpReader;

pub struct Enricher {
    cache: Arc<DeviceCache>,
    geoip: Option<GeoIpReader>,
}

impl Enricher {
    pub fn new(cache: Arc<DeviceCache>, geoip: Option<GeoIpReader>) -> Self {
        Self { cache, geoip }
    }

    /// Enriches a single flow in place. Fields that cannot be resolved are
    /// left empty, never fabricated.
    pub fn enrich(&self, flow: &mut EnrichedFlow) {
        self.apply_device_metadata(flow);
        self.apply_geoip(flow);
    }

    fn apply_device_metadata(&self, flow: &mut EnrichedFlow) {
        let exporter_ip = u32_to_dotted(flow.exporter_ip);
        let hit = self.cache.with_device(&exporter_ip, |device| {
            flow.exporter_name = device.name.clone();
            flow.exporter_site = device.site.clone();
            flow.exporter_region = device.region.clone();
            flow.exporter_role = device.role.clone();

            if let Some(iface) = device.interfaces.get(&flow.in_if) {
                flow.in_if_name = iface.name.clone();
                flow.in_if_speed = iface.speed;
            }
            if let Some(iface) = device.interfaces.get(&flow.out_if) {
                flow.out_if_name = iface.name.clone();
                flow.out_if_speed = iface.speed;
            }
        });

        if hit.is_none() {
            debug!("no device metadata for exporter {exporter_ip}");
        }
    }

    fn apply_geoip(&self, flow: &mut EnrichedFlow) {
        let geoip = match &self.geoip {
            Some(geoip) => geoip,
            None => return,
        };

        if let Some(src) = bytes_to_ip(&flow.src_ip) {
            let result = geoip.lookup(src);
            flow.src_country = result.country;
            flow.src_city = result.city;
            flow.src_as_name = result.as_name;
            if flow.src_as == 0 {
                flow.src_as = result.as_num;
            }
        }

        if let Some(dst) = bytes_to_ip(&flow.dst_ip) {
            let result = geoip.lookup(dst);
            flow.dst_country = result.country;
            flow.dst_city = result.city;
            flow.dst_as_name = result.as_name;
            if flow.dst_as == 0 {
                flow.dst_as = result.as_num;
            }
        }
    }
}

/// Formats a big-endian fixed32 IPv4 address as a dotted quad.
pub fn u32_to_dotted(ip: u32) -> String {
    format!(
        "{}.{}.{}.{}",
        (ip >> 24) & 0xff,
        (ip >> 16) & 0xff,
        (ip >> 8) & 0xff,
        ip & 0xff
    )
}

fn bytes_to_ip(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_REFRESH_INTERVAL;
    use helios_netbox::{DeviceMetadata, InterfaceMetadata};
    use std::collections::HashMap;

    fn populated_cache(devices: HashMap<String, DeviceMetadata>) -> Arc<DeviceCache> {
        let cache = DeviceCache::new(None, DEFAULT_REFRESH_INTERVAL);
        cache.install(devices);
        Arc::new(cache)
    }

    #[test]
    fn enriches_flow_with_device_metadata() {
        let cache = populated_cache(HashMap::from([(
            "10.0.0.1".to_string(),
            DeviceMetadata {
                name: "router-1".to_string(),
                site: "dc1".to_string(),
                region: "us-east".to_string(),
                role: "core-router".to_string(),
                interfaces: HashMap::from([
                    (1, InterfaceMetadata { name: "Ethernet1".to_string(), speed: 10000 }),
                    (2, InterfaceMetadata { name: "Ethernet2".to_string(), speed: 25000 }),
                ]),
            },
        )]));
        let e = Enricher::new(cache, None);

        let mut flow = EnrichedFlow {
            exporter_ip: 0x0A000001,
            in_if: 1,
            out_if: 2,
            ..Default::default()
        };
        e.enrich(&mut flow);

        assert_eq!(flow.exporter_name, "router-1");
        assert_eq!(flow.exporter_site, "dc1");
        assert_eq!(flow.exporter_region, "us-east");
        assert_eq!(flow.exporter_role, "core-router");
        assert_eq!(flow.in_if_name, "Ethernet1");
        assert_eq!(flow.in_if_speed, 10000);
        assert_eq!(flow.out_if_name, "Ethernet2");
        assert_eq!(flow.out_if_speed, 25000);
    }

    #[test]
    fn device_hit_without_matching_interfaces() {
        let cache = populated_cache(HashMap::from([(
            "10.0.0.2".to_string(),
            DeviceMetadata {
                name: "switch-1".to_string(),
                site: "dc2".to_string(),
                region: "eu-west".to_string(),
                role: "access".to_string(),
                interfaces: HashMap::new(),
            },
        )]));
        let e = Enricher::new(cache, None);

        let mut flow = EnrichedFlow {
            exporter_ip: 0x0A000002,
            in_if: 99,
            out_if: 100,
            ..Default::default()
        };
        e.enrich(&mut flow);

        assert_eq!(flow.exporter_name, "switch-1");
        assert_eq!(flow.in_if_name, "");
        assert_eq!(flow.in_if_speed, 0);
        assert_eq!(flow.out_if_name, "");
    }

    #[test]
    fn cache_miss_leaves_flow_untouched() {
        let e = Enricher::new(populated_cache(HashMap::new()), None);

        let mut flow = EnrichedFlow {
            exporter_ip: u32::from_be_bytes([192, 168, 99, 99]),
            src_ip: vec![1, 2, 3, 4],
            dst_ip: vec![5, 6, 7, 8],
            bytes: 1234,
            packets: 5,
            ..Default::default()
        };
        let before = flow.clone();
        e.enrich(&mut flow);

        assert_eq!(flow, before);
        assert_eq!(flow.exporter_name, "");
        assert_eq!(flow.exporter_site, "");
    }

    #[test]
    fn nil_geoip_skips_geo_enrichment() {
        let e = Enricher::new(populated_cache(HashMap::new()), None);

        let mut flow = EnrichedFlow {
            src_ip: vec![8, 8, 8, 8],
            dst_ip: vec![1, 1, 1, 1],
            ..Default::default()
        };
        e.enrich(&mut flow);

        assert_eq!(flow.src_country, "");
        assert_eq!(flow.dst_country, "");
        assert_eq!(flow.src_as, 0);
    }

    #[test]
    fn u32_to_dotted_formats_big_endian() {
        let cases = [
            (0x0A000001u32, "10.0.0.1"),
            (0xC0A80101, "192.168.1.1"),
            (0xFFFFFFFF, "255.255.255.255"),
            (0x00000000, "0.0.0.0"),
            (0xAC100064, "172.16.0.100"),
        ];
        for (ip, want) in cases {
            assert_eq!(u32_to_dotted(ip), want);
        }
    }

    #[test]
    fn bytes_to_ip_handles_lengths() {
        assert_eq!(
            bytes_to_ip(&[192, 168, 1, 1]),
            Some("192.168.1.1".parse().unwrap())
        );
        let v6 = "2001:db8::1".parse::<IpAddr>().unwrap();
        let octets = match v6 {
            IpAddr::V6(addr) => addr.octets().to_vec(),
            _ => unreachable!(),
        };
        assert_eq!(bytes_to_ip(&octets), Some(v6));
        assert_eq!(bytes_to_ip(&[]), None);
        assert_eq!(bytes_to_ip(&[1, 2, 3]), None);
    }
}
