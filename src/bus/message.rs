//! Message envelope, ontologies and key=value payload codecs.

use std::fmt;

use crate::error::MessageError;

/// Broadcast topic carrying one message per simulation tick.
pub const TICK_TOPIC: &str = "TICK_TOPIC";
/// Topic carrying weather observations (`G=<n>;T=<n>`).
pub const IRRADIANCE_TOPIC: &str = "IRRADIANCE_TOPIC";
/// Call-for-proposals topic for energy shortfalls.
pub const CNP_SHORTFALL_TOPIC: &str = "CNP_SHORTFALL_TOPIC";
/// Call-for-proposals topic for energy surpluses.
pub const CNP_SURPLUS_TOPIC: &str = "CNP_SURPLUS_TOPIC";

/// Identifier of an actor registered on the bus.
pub type ActorId = String;

/// Semantic tag carried by every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ontology {
    Tick,
    EnergyProduction,
    EnergyConsumption,
    CnpShortfall,
    CnpSurplus,
    CnpProposal,
    CnpAccept,
    CnpReject,
    /// Settlement report for an ACCEPT: what the resource actually did.
    CnpInform,
    Irradiance,
}

impl Ontology {
    /// Wire name of the ontology.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tick => "TICK",
            Self::EnergyProduction => "ENERGY_PRODUCTION",
            Self::EnergyConsumption => "ENERGY_CONSUMPTION",
            Self::CnpShortfall => "CNP_SHORTFALL",
            Self::CnpSurplus => "CNP_SURPLUS",
            Self::CnpProposal => "CNP_PROPOSAL",
            Self::CnpAccept => "CNP_ACCEPT",
            Self::CnpReject => "CNP_REJECT",
            Self::CnpInform => "CNP_INFORM",
            Self::Irradiance => "IRRADIANCE",
        }
    }
}

impl fmt::Display for Ontology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message travelling over the bus.
///
/// `conversation` carries the CNP round number for negotiation traffic and
/// the tick number for reports and weather observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender: ActorId,
    pub ontology: Ontology,
    pub content: String,
    pub in_reply_to: Option<Ontology>,
    pub conversation: Option<i64>,
}

impl Envelope {
    /// Creates an envelope with no reply context.
    pub fn new(sender: impl Into<ActorId>, ontology: Ontology, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            ontology,
            content: content.into(),
            in_reply_to: None,
            conversation: None,
        }
    }

    /// Marks the envelope as a reply to a message of the given ontology.
    pub fn in_reply_to(mut self, ontology: Ontology) -> Self {
        self.in_reply_to = Some(ontology);
        self
    }

    /// Tags the envelope with a conversation id.
    pub fn with_conversation(mut self, id: i64) -> Self {
        self.conversation = Some(id);
        self
    }
}

/// Direction of a negotiation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfpKind {
    /// Consumption exceeds production; bidders offer supply.
    Shortfall,
    /// Production exceeds consumption; bidders offer storage.
    Surplus,
}

impl CfpKind {
    pub fn topic(self) -> &'static str {
        match self {
            Self::Shortfall => CNP_SHORTFALL_TOPIC,
            Self::Surplus => CNP_SURPLUS_TOPIC,
        }
    }

    pub fn ontology(self) -> Ontology {
        match self {
            Self::Shortfall => Ontology::CnpShortfall,
            Self::Surplus => Ontology::CnpSurplus,
        }
    }

    /// Maps a CFP ontology back to its kind.
    pub fn from_ontology(ontology: Ontology) -> Option<Self> {
        match ontology {
            Ontology::CnpShortfall => Some(Self::Shortfall),
            Ontology::CnpSurplus => Some(Self::Surplus),
            _ => None,
        }
    }

    /// Payload key naming the offered amount in a proposal.
    fn amount_key(self) -> &'static str {
        match self {
            Self::Shortfall => "supply",
            Self::Surplus => "store",
        }
    }
}

/// Decoded `CNP_PROPOSAL` payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offer {
    pub kind: CfpKind,
    pub amount: f64,
    pub cost: f64,
}

impl Offer {
    /// Encodes as `supply=<n>;cost=<n>` or `store=<n>;cost=<n>`.
    pub fn encode(&self) -> String {
        format!("{}={};cost={}", self.kind.amount_key(), self.amount, self.cost)
    }
}

/// Reason sent with every `CNP_REJECT`.
pub const REJECT_REASON: &str = "reason=better offers or shortfall satisfied";

/// Parses a single numeric kW payload.
///
/// # Errors
///
/// Returns [`MessageError`] if the trimmed content is empty or not a finite number.
pub fn parse_kw(content: &str) -> Result<f64, MessageError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(MessageError::Empty);
    }
    parse_number("value", trimmed)
}

/// Splits a `k=v;k=v` payload into lowercase-key pairs.
///
/// Segments without `=` are ignored.
fn pairs(content: &str) -> impl Iterator<Item = (String, &str)> {
    content.split(';').filter_map(|segment| {
        let (key, value) = segment.split_once('=')?;
        Some((key.trim().to_ascii_lowercase(), value.trim()))
    })
}

fn parse_number(key: &str, value: &str) -> Result<f64, MessageError> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(MessageError::InvalidNumber {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Parses a proposal payload. Keys are case-insensitive.
///
/// # Errors
///
/// Returns [`MessageError`] when the amount or cost is missing or not numeric.
pub fn parse_offer(content: &str) -> Result<Offer, MessageError> {
    if content.trim().is_empty() {
        return Err(MessageError::Empty);
    }
    let mut kind = None;
    let mut amount = None;
    let mut cost = None;
    for (key, value) in pairs(content) {
        match key.as_str() {
            "supply" => {
                kind = Some(CfpKind::Shortfall);
                amount = Some(parse_number(&key, value)?);
            }
            "store" => {
                kind = Some(CfpKind::Surplus);
                amount = Some(parse_number(&key, value)?);
            }
            "cost" => cost = Some(parse_number(&key, value)?),
            _ => {}
        }
    }
    let (Some(kind), Some(amount)) = (kind, amount) else {
        return Err(MessageError::MissingKey("supply|store"));
    };
    let cost = cost.ok_or(MessageError::MissingKey("cost"))?;
    Ok(Offer { kind, amount, cost })
}

/// Encodes an `acceptedAmount=<n>` payload.
pub fn encode_accept(amount: f64) -> String {
    format!("acceptedAmount={amount}")
}

/// Parses an `acceptedAmount=<n>` payload.
///
/// # Errors
///
/// Returns [`MessageError`] if the key is missing or the value is not numeric.
pub fn parse_accept(content: &str) -> Result<f64, MessageError> {
    pairs(content)
        .find(|(key, _)| key == "acceptedamount")
        .ok_or(MessageError::MissingKey("acceptedAmount"))
        .and_then(|(key, value)| parse_number(&key, value))
}

/// Encodes a `deliveredAmount=<n>` payload.
pub fn encode_inform(delivered: f64) -> String {
    format!("deliveredAmount={delivered}")
}

/// Parses a `deliveredAmount=<n>` payload.
///
/// # Errors
///
/// Returns [`MessageError`] if the key is missing or the value is not numeric.
pub fn parse_inform(content: &str) -> Result<f64, MessageError> {
    pairs(content)
        .find(|(key, _)| key == "deliveredamount")
        .ok_or(MessageError::MissingKey("deliveredAmount"))
        .and_then(|(key, value)| parse_number(&key, value))
}

/// A weather observation carried on the irradiance topic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Irradiance {
    /// Global horizontal irradiance (W/m²).
    pub g: f64,
    /// Ambient temperature (°C).
    pub t: f64,
}

impl Irradiance {
    pub fn encode(&self) -> String {
        format!("G={};T={}", self.g, self.t)
    }
}

/// Parses a `G=<n>;T=<n>` payload.
///
/// # Errors
///
/// Returns [`MessageError`] if either key is missing or not numeric.
pub fn parse_irradiance(content: &str) -> Result<Irradiance, MessageError> {
    let mut g = None;
    let mut t = None;
    for (key, value) in pairs(content) {
        match key.as_str() {
            "g" => g = Some(parse_number(&key, value)?),
            "t" => t = Some(parse_number(&key, value)?),
            _ => {}
        }
    }
    Ok(Irradiance {
        g: g.ok_or(MessageError::MissingKey("G"))?,
        t: t.ok_or(MessageError::MissingKey("T"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supply_offer_case_insensitive() {
        let offer = parse_offer("Supply=12.5;COST=0.05").unwrap();
        assert_eq!(offer.kind, CfpKind::Shortfall);
        assert_eq!(offer.amount, 12.5);
        assert_eq!(offer.cost, 0.05);
    }

    #[test]
    fn parses_store_offer_with_spaces() {
        let offer = parse_offer(" store = 4 ; cost = 1 ").unwrap();
        assert_eq!(offer.kind, CfpKind::Surplus);
        assert_eq!(offer.amount, 4.0);
    }

    #[test]
    fn offer_encoding_is_parseable() {
        let offer = Offer {
            kind: CfpKind::Surplus,
            amount: 3.0,
            cost: 0.1,
        };
        assert_eq!(offer.encode(), "store=3;cost=0.1");
        assert_eq!(parse_offer(&offer.encode()).unwrap(), offer);
    }

    #[test]
    fn rejects_offer_without_cost() {
        assert_eq!(
            parse_offer("supply=3"),
            Err(MessageError::MissingKey("cost"))
        );
    }

    #[test]
    fn rejects_non_numeric_amount() {
        assert!(matches!(
            parse_offer("supply=lots;cost=1"),
            Err(MessageError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn parse_kw_rejects_garbage() {
        assert_eq!(parse_kw(" 42.5 "), Ok(42.5));
        assert_eq!(parse_kw(""), Err(MessageError::Empty));
        assert!(parse_kw("NaN").is_err());
        assert!(parse_kw("abc").is_err());
    }

    #[test]
    fn accept_payload() {
        assert_eq!(encode_accept(6.0), "acceptedAmount=6");
        assert_eq!(parse_accept("acceptedAmount=6"), Ok(6.0));
        assert!(parse_accept("amount=6").is_err());
    }

    #[test]
    fn inform_payload() {
        assert_eq!(encode_inform(2.5), "deliveredAmount=2.5");
        assert_eq!(parse_inform("DeliveredAmount = 0"), Ok(0.0));
        assert_eq!(
            parse_inform("acceptedAmount=3"),
            Err(MessageError::MissingKey("deliveredAmount"))
        );
    }

    #[test]
    fn irradiance_payload() {
        let obs = parse_irradiance("G=812.5;T=24.1").unwrap();
        assert_eq!(obs.g, 812.5);
        assert_eq!(obs.t, 24.1);
        assert!(parse_irradiance("G=1").is_err());
    }

    #[test]
    fn cfp_kind_round_trips_through_ontology() {
        for kind in [CfpKind::Shortfall, CfpKind::Surplus] {
            assert_eq!(CfpKind::from_ontology(kind.ontology()), Some(kind));
        }
        assert_eq!(CfpKind::from_ontology(Ontology::Tick), None);
    }
}
