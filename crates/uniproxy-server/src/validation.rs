//! Request path validation: datacenter/world whitelist and item-id parsing.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ApiError;

/// Maximum number of item ids accepted in one request.
pub const MAX_ITEM_IDS: usize = 100;
/// Highest accepted item id.
pub const MAX_ITEM_ID: u64 = 1_000_000;
/// How many offending values an error body lists before truncating.
const MAX_REPORTED_IDS: usize = 10;

static ITEM_IDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9,]+$").expect("invalid item-ids regex"));

/// Known datacenters and worlds, matched case-insensitively.
static KNOWN_DATACENTERS: &[&str] = &[
    // North America
    "Aether",
    "Adamantoise",
    "Cactuar",
    "Faerie",
    "Gilgamesh",
    "Jenova",
    "Midgardsormr",
    "Sargatanas",
    "Siren",
    "Primal",
    "Behemoth",
    "Excalibur",
    "Exodus",
    "Famfrit",
    "Hyperion",
    "Lamia",
    "Leviathan",
    "Ultros",
    "Crystal",
    "Balmung",
    "Brynhildr",
    "Coeurl",
    "Diabolos",
    "Goblin",
    "Malboro",
    "Mateus",
    "Zalera",
    "Dynamis",
    "Cuchulainn",
    "Golem",
    "Halicarnassus",
    "Kraken",
    "Maduin",
    "Marilith",
    "Rafflesia",
    "Seraph",
    // Europe
    "Chaos",
    "Cerberus",
    "Louisoix",
    "Moogle",
    "Omega",
    "Phantom",
    "Ragnarok",
    "Sagittarius",
    "Spriggan",
    "Light",
    "Alpha",
    "Lich",
    "Odin",
    "Phoenix",
    "Raiden",
    "Shiva",
    "Twintania",
    "Zodiark",
    "Shadow",
    "Innocence",
    "Pixie",
    "Titania",
    "Tycoon",
    // Japan
    "Elemental",
    "Aegis",
    "Atomos",
    "Carbuncle",
    "Garuda",
    "Gungnir",
    "Kujata",
    "Tonberry",
    "Typhon",
    "Gaia",
    "Alexander",
    "Bahamut",
    "Durandal",
    "Fenrir",
    "Ifrit",
    "Ridill",
    "Tiamat",
    "Ultima",
    "Mana",
    "Anima",
    "Asura",
    "Chocobo",
    "Hades",
    "Ixion",
    "Masamune",
    "Pandaemonium",
    "Titan",
    "Meteor",
    "Belias",
    "Mandragora",
    "Ramuh",
    "Shinryu",
    "Unicorn",
    "Valefor",
    "Yojimbo",
    "Zeromus",
    // Oceania
    "Materia",
    "Bismarck",
    "Ravana",
    "Sephirot",
    "Sophia",
    "Zurvan",
];

/// Whether `name` is a known datacenter or world (case-insensitive).
pub fn is_known_datacenter(name: &str) -> bool {
    KNOWN_DATACENTERS
        .iter()
        .any(|dc| dc.eq_ignore_ascii_case(name))
}

/// Parse and validate the `itemIds` path segment.
///
/// Accepts 1–100 comma-separated integers, each in `[1, 1_000_000]`. The
/// error body lists the offending values, truncated to the first ten.
pub fn parse_item_ids(raw: &str) -> Result<Vec<u64>, ApiError> {
    if !ITEM_IDS_RE.is_match(raw) {
        return Err(ApiError::invalid_input(
            "itemIds must be a comma-separated list of numeric ids",
        ));
    }

    let mut ids = Vec::new();
    let mut offending = Vec::new();
    for part in raw.split(',') {
        match part.parse::<u64>() {
            Ok(id) if (1..=MAX_ITEM_ID).contains(&id) => ids.push(id),
            // Empty segments land here too: "" is not a positive integer.
            _ => offending.push(part.to_string()),
        }
    }

    if !offending.is_empty() {
        let shown = offending
            .iter()
            .take(MAX_REPORTED_IDS)
            .map(|part| format!("'{part}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let suffix = if offending.len() > MAX_REPORTED_IDS {
            ", …"
        } else {
            ""
        };
        return Err(ApiError::invalid_input(format!(
            "item ids must be positive integers in [1, {MAX_ITEM_ID}]; invalid: {shown}{suffix}"
        )));
    }
    if ids.len() > MAX_ITEM_IDS {
        return Err(ApiError::invalid_input(format!(
            "too many item ids: {} (maximum {MAX_ITEM_IDS})",
            ids.len()
        )));
    }

    Ok(ids)
}
