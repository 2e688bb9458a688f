use std::net::IpAddr;

use anyhow::Result;
use chrono::{DateTime, Local};
use log::{debug, error, warn};

use crate::cache::Cache;
use crate::retriever::Retriever;
use crate::sid;
use crate::store::{DbValue, Persistence};
use crate::wire::Trap;

const TRAP_OID: &str = "1.3.6.1.6.3.1.1.4.1.0";
const LINK_UP_OID: &str = "1.3.6.1.6.3.1.1.5.4";
const LINK_DOWN_OID: &str = "1.3.6.1.6.3.1.1.5.3";

const IF_INDEX_PREFIX: &str = "1.3.6.1.2.1.2.2.1.1";
const IF_ADMIN_STATUS_PREFIX: &str = "1.3.6.1.2.1.2.2.1.7";
const IF_OPER_STATUS_PREFIX: &str = "1.3.6.1.2.1.2.2.1.8";
/// Some devices (JunOS-style) inline the interface name directly into the
/// trap's varbinds under this prefix, sparing a back-query entirely.
const IF_NAME_INLINE_PREFIX: &str = "1.3.6.1.2.1.31.1.1.1.1";
const IF_NAME_QUERY_PREFIX: &str = "1.3.6.1.2.1.31.1.1.1.1.";
const IF_ALIAS_QUERY_PREFIX: &str = "1.3.6.1.2.1.31.1.1.1.18.";
const SYS_UPTIME_OID: &str = "1.3.6.1.2.1.1.3.0";
const SYS_NAME_OID: &str = "1.3.6.1.2.1.1.5.0";

/// Interface administrative/operational status. Anything other than the
/// SNMP enum value `1` (up) renders as `"down"`, including an unset field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IfStatus {
    Up,
    #[default]
    Down,
}

impl IfStatus {
    pub fn from_integer(value: i64) -> Self {
        if value == 1 {
            IfStatus::Up
        } else {
            IfStatus::Down
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IfStatus::Up => "up",
            IfStatus::Down => "down",
        }
    }
}

/// The in-memory event under construction for one trap. Owned by exactly
/// one task from creation to drop — no `Arc`, no sharing.
#[derive(Debug, Clone)]
pub struct Flap {
    pub sid: String,
    pub ip_address: String,
    pub if_index: i64,
    pub if_admin_status: IfStatus,
    pub if_oper_status: IfStatus,
    pub if_name: Option<String>,
    pub if_alias: Option<String>,
    pub host_name: Option<String>,
    pub time: DateTime<Local>,
    pub time_ticks: u64,
}

/// True iff `oid` names the scalar `prefix` itself or an instance under it
/// (`prefix.<index>...`). A plain `starts_with` would also match sibling
/// table columns that happen to share a numeric prefix — e.g. `ifIndex`'s
/// `...2.2.1.1` wrongly matching `...2.2.1.10` (ifInOctets) — so the arc
/// boundary is checked explicitly.
fn oid_under(oid: &str, prefix: &str) -> bool {
    match oid.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

/// Returns true iff the trap's `snmpTrapOID.0` binding names linkUp or
/// linkDown. Every other trap (coldStart, warmStart, vendor enterprise
/// traps, …) is discarded upstream without ever reaching a `Flap`.
pub fn is_link_event(trap: &Trap) -> bool {
    use crate::wire::VarbindValue;

    trap.varbinds.iter().any(|vb| {
        vb.oid == TRAP_OID
            && matches!(&vb.value, VarbindValue::ObjectId(oid) if oid == LINK_UP_OID || oid == LINK_DOWN_OID)
    })
}

impl Flap {
    /// Builds a `Flap` from a decoded trap and the UDP source address.
    /// `ipAddress` always comes from the datagram's source, never from a
    /// varbind.
    pub fn from_trap(trap: &Trap, source: IpAddr) -> Self {
        let mut flap = Flap {
            sid: sid::new(),
            ip_address: source.to_string(),
            if_index: 0,
            if_admin_status: IfStatus::Down,
            if_oper_status: IfStatus::Down,
            if_name: None,
            if_alias: None,
            host_name: None,
            time: Local::now(),
            time_ticks: 0,
        };

        for vb in &trap.varbinds {
            if oid_under(&vb.oid, IF_INDEX_PREFIX) {
                match vb.value.as_i64() {
                    Some(n) => flap.if_index = n,
                    None => warn!("sid={}: ifIndex varbind has an unexpected type", flap.sid),
                }
                continue;
            }

            if oid_under(&vb.oid, IF_ADMIN_STATUS_PREFIX) {
                match vb.value.as_i64() {
                    Some(n) => flap.if_admin_status = IfStatus::from_integer(n),
                    None => warn!("sid={}: ifAdminStatus varbind has an unexpected type", flap.sid),
                }
                continue;
            }

            if oid_under(&vb.oid, IF_OPER_STATUS_PREFIX) {
                match vb.value.as_i64() {
                    Some(n) => flap.if_oper_status = IfStatus::from_integer(n),
                    None => warn!("sid={}: ifOperStatus varbind has an unexpected type", flap.sid),
                }
                continue;
            }

            if oid_under(&vb.oid, IF_NAME_INLINE_PREFIX) {
                match vb.value.as_text() {
                    Some(name) => flap.if_name = Some(name),
                    None => warn!("sid={}: ifName varbind has an unexpected type", flap.sid),
                }
                continue;
            }

            if vb.oid == SYS_UPTIME_OID {
                match vb.value.as_u64() {
                    Some(ticks) => flap.time_ticks = ticks,
                    None => warn!("sid={}: missing timeTicks in the SNMP trap", flap.sid),
                }
            }
        }

        if flap.time_ticks == 0 {
            debug!("sid={}: trap carried no timeTicks", flap.sid);
        }

        flap
    }

    fn timestamp(&self) -> String {
        self.time.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// Phase A: insert the row that gives this trap a durable identity
    /// (`sid`) before any enrichment is attempted.
    pub async fn save(&self, store: &dyn Persistence) -> Result<()> {
        let args: Vec<(&str, DbValue)> = vec![
            ("ipaddress", DbValue::from(self.ip_address.clone())),
            ("hostname", DbValue::from(self.host_name.clone())),
            ("ifIndex", DbValue::from(self.if_index)),
            ("ifName", DbValue::from(self.if_name.clone())),
            ("ifAlias", DbValue::from(self.if_alias.clone())),
            ("ifAdminStatus", DbValue::from(self.if_admin_status.as_str())),
            ("ifOperStatus", DbValue::from(self.if_oper_status.as_str())),
            ("time", DbValue::from(self.timestamp())),
            ("sid", DbValue::from(self.sid.clone())),
            ("timeTicks", DbValue::from(self.time_ticks as i64)),
        ];

        let query = "INSERT INTO ports \
            (ipaddress, hostname, ifIndex, ifName, ifAlias, ifAdminStatus, ifOperStatus, time, sid, timeTicks) \
            VALUES \
            (:ipaddress, :hostname, :ifIndex, :ifName, :ifAlias, :ifAdminStatus, :ifOperStatus, :time, :sid, :timeTicks)";

        store.named_exec(query, &args).await?;
        Ok(())
    }

    /// Phase B: write back whatever enrichment succeeded (NULLs included).
    pub async fn update(&self, store: &dyn Persistence) -> Result<()> {
        let args: Vec<(&str, DbValue)> = vec![
            ("hostname", DbValue::from(self.host_name.clone())),
            ("ifName", DbValue::from(self.if_name.clone())),
            ("ifAlias", DbValue::from(self.if_alias.clone())),
            ("sid", DbValue::from(self.sid.clone())),
        ];

        let query = "UPDATE ports SET hostname = :hostname, ifName = :ifName, ifAlias = :ifAlias WHERE sid = :sid";
        store.named_exec(query, &args).await?;
        Ok(())
    }

    /// Fills whichever of `hostName`/`ifName`/`ifAlias` the parse left
    /// absent, each independently: a failure on one never blocks the
    /// others.
    pub async fn fetch_missing_data(&mut self, cache: &Cache, retriever: &Retriever) {
        if self.host_name.is_none() {
            self.fill_hostname(cache, retriever).await;
        }
        if self.if_name.is_none() {
            self.fill_ifname(cache, retriever).await;
        }
        if self.if_alias.is_none() {
            self.fill_ifalias(cache, retriever).await;
        }
    }

    async fn fill_hostname(&mut self, cache: &Cache, retriever: &Retriever) {
        if let Some(name) = cache.get_hostname(&self.ip_address).await {
            debug!("sid={}: used cached hostname {}", self.sid, name);
            self.host_name = Some(name);
            return;
        }

        match retriever.get_string(SYS_NAME_OID, &self.ip_address).await {
            Ok(name) => {
                debug!("sid={}: received hostname {} from {} via snmp", self.sid, name, self.ip_address);
                if let Err(e) = cache.put_hostname(&self.ip_address, &name).await {
                    error!("sid={}: unable to cache hostname: {}", self.sid, e);
                }
                self.host_name = Some(name);
            }
            Err(e) => warn!(
                "sid={}: unable to get hostname via snmp from {}: {}",
                self.sid, self.ip_address, e
            ),
        }
    }

    async fn fill_ifname(&mut self, cache: &Cache, retriever: &Retriever) {
        if let Some(name) = cache.get_ifname(&self.ip_address, self.if_index).await {
            debug!("sid={}: used cached ifName {}", self.sid, name);
            self.if_name = Some(name);
            return;
        }

        let oid = format!("{}{}", IF_NAME_QUERY_PREFIX, self.if_index);
        match retriever.get_string(&oid, &self.ip_address).await {
            Ok(name) => {
                debug!("sid={}: received ifName {} from {} via snmp", self.sid, name, self.ip_address);
                if let Err(e) = cache.put_ifname(&self.ip_address, self.if_index, &name).await {
                    error!("sid={}: unable to cache ifName: {}", self.sid, e);
                }
                self.if_name = Some(name);
            }
            Err(e) => warn!(
                "sid={}: unable to get ifName via snmp from {} for {}: {}",
                self.sid, self.ip_address, self.if_index, e
            ),
        }
    }

    async fn fill_ifalias(&mut self, cache: &Cache, retriever: &Retriever) {
        if let Some(alias) = cache.get_ifalias(&self.ip_address, self.if_index).await {
            debug!("sid={}: used cached ifAlias {}", self.sid, alias);
            self.if_alias = Some(alias);
            return;
        }

        let oid = format!("{}{}", IF_ALIAS_QUERY_PREFIX, self.if_index);
        match retriever.get_string(&oid, &self.ip_address).await {
            Ok(alias) => {
                debug!("sid={}: received ifAlias {} from {} via snmp", self.sid, alias, self.ip_address);
                if let Err(e) = cache.put_ifalias(&self.ip_address, self.if_index, &alias).await {
                    error!("sid={}: unable to cache ifAlias: {}", self.sid, e);
                }
                self.if_alias = Some(alias);
            }
            Err(e) => warn!(
                "sid={}: unable to get ifAlias via snmp from {} for {}: {}",
                self.sid, self.ip_address, self.if_index, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Varbind, VarbindValue};

    fn trap_with(varbinds: Vec<Varbind>) -> Trap {
        Trap {
            community: "public".to_string(),
            varbinds,
        }
    }

    #[test]
    fn recognizes_link_down() {
        let trap = trap_with(vec![Varbind {
            oid: TRAP_OID.to_string(),
            value: VarbindValue::ObjectId(LINK_DOWN_OID.to_string()),
        }]);
        assert!(is_link_event(&trap));
    }

    #[test]
    fn recognizes_link_up() {
        let trap = trap_with(vec![Varbind {
            oid: TRAP_OID.to_string(),
            value: VarbindValue::ObjectId(LINK_UP_OID.to_string()),
        }]);
        assert!(is_link_event(&trap));
    }

    #[test]
    fn rejects_cold_start() {
        let trap = trap_with(vec![Varbind {
            oid: TRAP_OID.to_string(),
            value: VarbindValue::ObjectId("1.3.6.1.6.3.1.1.5.1".to_string()),
        }]);
        assert!(!is_link_event(&trap));
    }

    #[test]
    fn rejects_trap_missing_the_oid_binding() {
        let trap = trap_with(vec![]);
        assert!(!is_link_event(&trap));
    }

    #[test]
    fn parses_ifindex_and_statuses() {
        let trap = trap_with(vec![
            Varbind {
                oid: format!("{}.5", IF_INDEX_PREFIX),
                value: VarbindValue::Integer(5),
            },
            Varbind {
                oid: format!("{}.5", IF_ADMIN_STATUS_PREFIX),
                value: VarbindValue::Integer(1),
            },
            Varbind {
                oid: format!("{}.5", IF_OPER_STATUS_PREFIX),
                value: VarbindValue::Integer(2),
            },
            Varbind {
                oid: SYS_UPTIME_OID.to_string(),
                value: VarbindValue::Unsigned(12345),
            },
        ]);

        let flap = Flap::from_trap(&trap, "10.0.0.1".parse().unwrap());
        assert_eq!(flap.if_index, 5);
        assert_eq!(flap.if_admin_status, IfStatus::Up);
        assert_eq!(flap.if_oper_status, IfStatus::Down);
        assert_eq!(flap.time_ticks, 12345);
        assert_eq!(flap.ip_address, "10.0.0.1");
    }

    #[test]
    fn missing_ifindex_defaults_to_zero() {
        let trap = trap_with(vec![]);
        let flap = Flap::from_trap(&trap, "10.0.0.1".parse().unwrap());
        assert_eq!(flap.if_index, 0);
    }

    #[test]
    fn wrong_typed_ifname_leaves_it_absent() {
        let trap = trap_with(vec![Varbind {
            oid: format!("{}.5", IF_NAME_INLINE_PREFIX),
            value: VarbindValue::Integer(1),
        }]);
        let flap = Flap::from_trap(&trap, "10.0.0.1".parse().unwrap());
        assert!(flap.if_name.is_none());
    }

    #[test]
    fn ifindex_prefix_does_not_swallow_sibling_table_columns() {
        // ifInOctets (column 10) and ifOutErrors (column 20) share a numeric
        // prefix with ifIndex (column 1) but are not ifIndex instances.
        let trap = trap_with(vec![
            Varbind {
                oid: "1.3.6.1.2.1.2.2.1.10.5".to_string(),
                value: VarbindValue::Integer(999),
            },
            Varbind {
                oid: "1.3.6.1.2.1.2.2.1.20.5".to_string(),
                value: VarbindValue::Integer(999),
            },
        ]);
        let flap = Flap::from_trap(&trap, "10.0.0.1".parse().unwrap());
        assert_eq!(flap.if_index, 0);
    }

    #[test]
    fn ifname_inline_prefix_does_not_match_ifalias_instance() {
        // ifAlias (column 18) shares a numeric prefix with the inline ifName
        // column (column 1) under 1.3.6.1.2.1.31.1.1.1.
        let trap = trap_with(vec![Varbind {
            oid: format!("{}8.5", IF_NAME_INLINE_PREFIX),
            value: VarbindValue::OctetString(b"uplink".to_vec()),
        }]);
        let flap = Flap::from_trap(&trap, "10.0.0.1".parse().unwrap());
        assert!(flap.if_name.is_none());
    }

    #[test]
    fn oid_under_requires_an_arc_boundary() {
        assert!(oid_under("1.3.6.1.2.1.2.2.1.1.5", IF_INDEX_PREFIX));
        assert!(oid_under(IF_INDEX_PREFIX, IF_INDEX_PREFIX));
        assert!(!oid_under("1.3.6.1.2.1.2.2.1.10.5", IF_INDEX_PREFIX));
        assert!(!oid_under("1.3.6.1.2.1.2.2.1.20.1", IF_INDEX_PREFIX));
    }

    #[test]
    fn if_admin_status_other_than_up_serializes_as_down() {
        assert_eq!(IfStatus::from_integer(1).as_str(), "up");
        assert_eq!(IfStatus::from_integer(2).as_str(), "down");
        assert_eq!(IfStatus::from_integer(0).as_str(), "down");
        assert_eq!(IfStatus::default().as_str(), "down");
    }

    /// An in-memory stand-in for `Store`, recording every statement it was
    /// asked to run in arrival order. Lets the two-phase persistence
    /// sequence (insert-then-update, same `sid`) be asserted without a
    /// live MySQL pool, per Design Notes §9's "this allows testing
    /// handlers against in-memory fakes".
    struct FakeStore {
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl FakeStore {
        fn new() -> Self {
            FakeStore {
                calls: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl crate::store::Persistence for FakeStore {
        async fn named_exec(&self, query: &str, args: &[(&str, DbValue)]) -> Result<u64> {
            let verb = query.split_whitespace().next().unwrap_or("");
            let sid = args
                .iter()
                .find(|(name, _)| *name == "sid")
                .map(|(_, v)| format!("{:?}", v));
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{:?}", verb, sid));
            Ok(1)
        }
    }

    #[tokio::test]
    async fn save_precedes_update_for_the_same_sid() {
        let store = FakeStore::new();
        let trap = trap_with(vec![Varbind {
            oid: format!("{}.7", IF_INDEX_PREFIX),
            value: VarbindValue::Integer(7),
        }]);
        let flap = Flap::from_trap(&trap, "10.0.0.3".parse().unwrap());

        flap.save(&store).await.unwrap();
        flap.update(&store).await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("INSERT"));
        assert!(calls[1].starts_with("UPDATE"));
        assert_eq!(calls[0].split(':').nth(1), calls[1].split(':').nth(1));
    }
}
