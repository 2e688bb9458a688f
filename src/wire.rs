use anyhow::{bail, Context, Result};
use rasn::types::{Integer, ObjectIdentifier};
use rasn_smi::v2 as smi_v2;
use rasn_snmp::v2;
use rasn_snmp::v2c;

/// A varbind value collapsed to the handful of shapes the daemon cares
/// about. Everything SNMP can carry that isn't one of these becomes
/// `Other`, which callers treat the same as "absent".
#[derive(Debug, Clone, PartialEq)]
pub enum VarbindValue {
    Integer(i64),
    Unsigned(u64),
    OctetString(Vec<u8>),
    ObjectId(String),
    Other,
}

impl VarbindValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            VarbindValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            VarbindValue::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            VarbindValue::Unsigned(n) => Some(*n),
            VarbindValue::Integer(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }
}

/// A single name/value pair out of a decoded PDU.
#[derive(Debug, Clone)]
pub struct Varbind {
    pub oid: String,
    pub value: VarbindValue,
}

/// A decoded SNMP v2c trap, stripped down to what the Flap Assembler needs.
#[derive(Debug, Clone)]
pub struct Trap {
    pub community: String,
    pub varbinds: Vec<Varbind>,
}

/// Decodes a UDP datagram as an SNMP v2c trap or inform PDU.
///
/// Only the PDU shapes a device actually uses to announce a trap are
/// accepted: `Trap` and `InformRequest` carry the same varbind list, so
/// both are treated identically. The daemon never acknowledges informs.
pub fn decode_trap(data: &[u8]) -> Result<Trap> {
    let msg = rasn::ber::decode::<v2c::Message<v2::Pdus>>(data)
        .context("not a well-formed SNMP v2c message")?;

    let community = String::from_utf8_lossy(&msg.community).into_owned();

    let pdu = match msg.data {
        v2::Pdus::Trap(v2::Trap(pdu)) => pdu,
        v2::Pdus::InformRequest(v2::Trap(pdu)) => pdu,
        other => bail!("unexpected PDU type in trap datagram: {:?}", pdu_kind(&other)),
    };

    let varbinds = pdu
        .variable_bindings
        .iter()
        .map(|vb| Varbind {
            oid: oid_to_string(&vb.name),
            value: varbind_value(&vb.value),
        })
        .collect();

    Ok(Trap { community, varbinds })
}

fn pdu_kind(pdus: &v2::Pdus) -> &'static str {
    match pdus {
        v2::Pdus::GetRequest(_) => "GetRequest",
        v2::Pdus::GetNextRequest(_) => "GetNextRequest",
        v2::Pdus::GetBulkRequest(_) => "GetBulkRequest",
        v2::Pdus::Response(_) => "Response",
        v2::Pdus::SetRequest(_) => "SetRequest",
        v2::Pdus::InformRequest(_) => "InformRequest",
        v2::Pdus::Trap(_) => "Trap",
        v2::Pdus::Report(_) => "Report",
    }
}

/// Encodes a single-OID GET request, BER-encoded and ready to write to a UDP
/// socket. `request_id` should be unique per in-flight request so the
/// response can (in principle) be matched back to it; the retriever only
/// ever has one request in flight, so this is a formality the protocol
/// requires rather than something the daemon depends on.
pub fn encode_get_request(community: &str, request_id: i32, oid: &str) -> Result<Vec<u8>> {
    let name = parse_oid(oid)?;

    let pdu = v2::Pdu {
        request_id: request_id.into(),
        error_status: 0u32.into(),
        error_index: 0u32.into(),
        variable_bindings: vec![v2::VarBind {
            name,
            value: v2::VarBindValue::Unspecified,
        }]
        .into(),
    };

    let msg = v2c::Message {
        version: 1.into(),
        community: community.as_bytes().to_vec().into(),
        data: v2::Pdus::GetRequest(pdu),
    };

    rasn::ber::encode(&msg).context("failed to encode SNMP GET request")
}

/// Decodes a GET response datagram and returns its single bound value.
/// Bails if the PDU isn't a `Response`, if it carries an SNMP error status,
/// or if it has no variable bindings — all treated uniformly as "the
/// device returned a wrong value" by the retriever.
pub fn decode_get_response(data: &[u8]) -> Result<Varbind> {
    let msg = rasn::ber::decode::<v2c::Message<v2::Pdus>>(data)
        .context("not a well-formed SNMP v2c message")?;

    let pdu = match msg.data {
        v2::Pdus::Response(pdu) => pdu,
        other => bail!("expected a GET response, got {}", pdu_kind(&other)),
    };

    if i64::try_from(&pdu.error_status).unwrap_or(0) != 0 {
        bail!("device returned SNMP error status {:?}", pdu.error_status);
    }

    let vb = pdu
        .variable_bindings
        .iter()
        .next()
        .context("GET response carried no variable bindings")?;

    Ok(Varbind {
        oid: oid_to_string(&vb.name),
        value: varbind_value(&vb.value),
    })
}

fn oid_to_string(oid: &ObjectIdentifier) -> String {
    oid.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(".")
}

fn parse_oid(s: &str) -> Result<ObjectIdentifier> {
    let arcs: Vec<u32> = s
        .trim_start_matches('.')
        .split('.')
        .map(|part| part.parse::<u32>().with_context(|| format!("invalid OID arc {:?} in {:?}", part, s)))
        .collect::<Result<_>>()?;

    ObjectIdentifier::new(arcs).with_context(|| format!("OID {:?} is not valid", s))
}

fn integer_to_i64(n: &Integer) -> i64 {
    i64::try_from(n).unwrap_or(0)
}

fn varbind_value(value: &v2::VarBindValue) -> VarbindValue {
    match value {
        v2::VarBindValue::Value(syntax) => object_syntax_to_value(syntax),
        _ => VarbindValue::Other,
    }
}

fn object_syntax_to_value(syntax: &smi_v2::ObjectSyntax) -> VarbindValue {
    match syntax {
        smi_v2::ObjectSyntax::Simple(simple) => match simple {
            smi_v2::SimpleSyntax::Integer(n) => VarbindValue::Integer(integer_to_i64(n)),
            smi_v2::SimpleSyntax::String(s) => VarbindValue::OctetString(s.as_ref().to_vec()),
            smi_v2::SimpleSyntax::ObjectId(oid) => VarbindValue::ObjectId(oid_to_string(oid)),
        },
        smi_v2::ObjectSyntax::ApplicationWide(app) => match app {
            smi_v2::ApplicationSyntax::Counter(c) => VarbindValue::Unsigned(c.0.into()),
            smi_v2::ApplicationSyntax::Unsigned(u) => VarbindValue::Unsigned(u.0 as u64),
            smi_v2::ApplicationSyntax::Ticks(t) => VarbindValue::Unsigned(t.0.into()),
            smi_v2::ApplicationSyntax::BigCounter(c) => VarbindValue::Unsigned(c.0),
            smi_v2::ApplicationSyntax::Arbitrary(bytes) => {
                VarbindValue::OctetString(bytes.as_ref().to_vec())
            }
            smi_v2::ApplicationSyntax::Address(addr) => VarbindValue::OctetString(addr.0.to_vec()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_trap(oid: &str, value: v2::VarBindValue) -> Vec<u8> {
        let pdu = v2::Pdu {
            request_id: 1.into(),
            error_status: 0u32.into(),
            error_index: 0u32.into(),
            variable_bindings: vec![v2::VarBind {
                name: parse_oid(oid).unwrap(),
                value,
            }]
            .into(),
        };
        let msg = v2c::Message {
            version: 1.into(),
            community: b"public".to_vec().into(),
            data: v2::Pdus::Trap(v2::Trap(pdu)),
        };
        rasn::ber::encode(&msg).unwrap()
    }

    #[test]
    fn decodes_a_link_down_trap() {
        let value = v2::VarBindValue::Value(smi_v2::ObjectSyntax::Simple(
            smi_v2::SimpleSyntax::ObjectId(parse_oid("1.3.6.1.6.3.1.1.5.3").unwrap()),
        ));
        let bytes = build_trap("1.3.6.1.6.3.1.1.4.1.0", value);

        let trap = decode_trap(&bytes).unwrap();
        assert_eq!(trap.community, "public");
        assert_eq!(trap.varbinds.len(), 1);
        assert_eq!(trap.varbinds[0].oid, "1.3.6.1.6.3.1.1.4.1.0");
        assert_eq!(
            trap.varbinds[0].value.clone(),
            VarbindValue::ObjectId("1.3.6.1.6.3.1.1.5.3".to_string())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_trap(&[0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn rejects_non_trap_pdu() {
        let pdu = v2::Pdu {
            request_id: 1.into(),
            error_status: 0u32.into(),
            error_index: 0u32.into(),
            variable_bindings: Vec::new().into(),
        };
        let msg = v2c::Message {
            version: 1.into(),
            community: b"public".to_vec().into(),
            data: v2::Pdus::GetRequest(pdu),
        };
        let bytes = rasn::ber::encode(&msg).unwrap();
        assert!(decode_trap(&bytes).is_err());
    }

    #[test]
    fn round_trips_a_get_response_octet_string() {
        let pdu = v2::Pdu {
            request_id: 42.into(),
            error_status: 0u32.into(),
            error_index: 0u32.into(),
            variable_bindings: vec![v2::VarBind {
                name: parse_oid("1.3.6.1.2.1.1.5.0").unwrap(),
                value: v2::VarBindValue::Value(smi_v2::ObjectSyntax::Simple(
                    smi_v2::SimpleSyntax::String(rasn::types::OctetString::from_static(b"sw1")),
                )),
            }]
            .into(),
        };
        let msg = v2c::Message {
            version: 1.into(),
            community: b"public".to_vec().into(),
            data: v2::Pdus::Response(pdu),
        };
        let bytes = rasn::ber::encode(&msg).unwrap();

        let vb = decode_get_response(&bytes).unwrap();
        assert_eq!(vb.oid, "1.3.6.1.2.1.1.5.0");
        assert_eq!(vb.value.as_text().unwrap(), "sw1");
    }

    #[test]
    fn encode_get_request_contains_the_oid() {
        let bytes = encode_get_request("public", 1, "1.3.6.1.2.1.1.5.0").unwrap();
        assert!(!bytes.is_empty());
    }
}
