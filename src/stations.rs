//! Station registry — maps Kalshi cities to NWS settlement stations.
//!
//! Static table of city → (ICAO station, CLI product code, IANA timezone,
//! coordinates, confidence). Source: Kalshi help center + NWS CLI pages.
//! Also owns the CLI climate-day window: midnight to midnight in local
//! STANDARD time, regardless of DST.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use lazy_static::lazy_static;

use crate::models::{MappingConfidence, MarketType, SettlementSpec};

const CLI_URL_TEMPLATE: &str =
    "https://forecast.weather.gov/product.php?site=NWS&product=CLI&issuedby=";

const CLI_FIELD_HIGH: &str = "MAXIMUM TEMPERATURE";
const CLI_FIELD_LOW: &str = "MINIMUM TEMPERATURE";

#[derive(Debug, Clone)]
pub struct StationEntry {
    /// City name as it appears in Kalshi event titles.
    pub city: &'static str,
    pub aliases: &'static [&'static str],
    /// ICAO station code used for METAR / observations.
    pub icao: &'static str,
    /// 3-letter code for the NWS CLI product (?issuedby=XXX).
    pub cli_code: &'static str,
    pub tz: Tz,
    pub confidence: MappingConfidence,
    pub notes: &'static [&'static str],
    /// Station coordinates, used for the sunrise estimate.
    pub lat: f64,
    pub lon: f64,
}

pub static STATION_DB: &[StationEntry] = &[
    StationEntry {
        city: "New York",
        aliases: &["NYC", "New York City"],
        icao: "KNYC",
        cli_code: "NYC",
        tz: chrono_tz::America::New_York,
        confidence: MappingConfidence::High,
        notes: &["Central Park observation site"],
        lat: 40.783,
        lon: -73.967,
    },
    StationEntry {
        city: "Chicago",
        aliases: &[],
        icao: "KMDW",
        cli_code: "MDW",
        tz: chrono_tz::America::Chicago,
        confidence: MappingConfidence::High,
        notes: &["Midway Airport; some Kalshi markets may use KORD (O'Hare)"],
        lat: 41.786,
        lon: -87.752,
    },
    StationEntry {
        city: "Miami",
        aliases: &[],
        icao: "KMIA",
        cli_code: "MIA",
        tz: chrono_tz::America::New_York,
        confidence: MappingConfidence::High,
        notes: &["Miami International Airport"],
        lat: 25.793,
        lon: -80.290,
    },
    StationEntry {
        city: "Austin",
        aliases: &[],
        icao: "KAUS",
        cli_code: "AUS",
        tz: chrono_tz::America::Chicago,
        confidence: MappingConfidence::High,
        notes: &["Austin-Bergstrom International Airport"],
        lat: 30.195,
        lon: -97.670,
    },
    StationEntry {
        city: "Los Angeles",
        aliases: &["LA"],
        icao: "KLAX",
        cli_code: "LAX",
        tz: chrono_tz::America::Los_Angeles,
        confidence: MappingConfidence::High,
        notes: &["LAX airport observation"],
        lat: 33.938,
        lon: -118.389,
    },
    StationEntry {
        city: "Denver",
        aliases: &[],
        icao: "KDEN",
        cli_code: "DEN",
        tz: chrono_tz::America::Denver,
        confidence: MappingConfidence::High,
        notes: &["Denver International Airport"],
        lat: 39.856,
        lon: -104.673,
    },
    StationEntry {
        city: "Las Vegas",
        aliases: &[],
        icao: "KLAS",
        cli_code: "LAS",
        tz: chrono_tz::America::Los_Angeles,
        confidence: MappingConfidence::High,
        notes: &["Harry Reid International Airport"],
        lat: 36.080,
        lon: -115.152,
    },
    StationEntry {
        city: "Seattle",
        aliases: &[],
        icao: "KSEA",
        cli_code: "SEA",
        tz: chrono_tz::America::Los_Angeles,
        confidence: MappingConfidence::High,
        notes: &["Seattle-Tacoma International Airport"],
        lat: 47.449,
        lon: -122.309,
    },
    StationEntry {
        city: "Atlanta",
        aliases: &[],
        icao: "KATL",
        cli_code: "ATL",
        tz: chrono_tz::America::New_York,
        confidence: MappingConfidence::High,
        notes: &["Hartsfield-Jackson Atlanta International Airport"],
        lat: 33.640,
        lon: -84.427,
    },
    StationEntry {
        city: "Boston",
        aliases: &[],
        icao: "KBOS",
        cli_code: "BOS",
        tz: chrono_tz::America::New_York,
        confidence: MappingConfidence::High,
        notes: &["Logan International Airport"],
        lat: 42.361,
        lon: -71.011,
    },
    StationEntry {
        city: "Charlotte",
        aliases: &[],
        icao: "KCLT",
        cli_code: "CLT",
        tz: chrono_tz::America::New_York,
        confidence: MappingConfidence::High,
        notes: &["Charlotte Douglas International Airport"],
        lat: 35.214,
        lon: -80.943,
    },
    StationEntry {
        city: "Dallas",
        aliases: &["Dallas-Fort Worth", "DFW"],
        icao: "KDFW",
        cli_code: "DFW",
        tz: chrono_tz::America::Chicago,
        confidence: MappingConfidence::High,
        notes: &["Dallas/Fort Worth International Airport"],
        lat: 32.898,
        lon: -97.040,
    },
    StationEntry {
        city: "Detroit",
        aliases: &[],
        icao: "KDTW",
        cli_code: "DTW",
        tz: chrono_tz::America::Detroit,
        confidence: MappingConfidence::High,
        notes: &["Detroit Metropolitan Airport"],
        lat: 42.212,
        lon: -83.349,
    },
    StationEntry {
        city: "Houston",
        aliases: &[],
        icao: "KHOU",
        cli_code: "HOU",
        tz: chrono_tz::America::Chicago,
        confidence: MappingConfidence::High,
        notes: &["William P. Hobby Airport"],
        lat: 29.645,
        lon: -95.279,
    },
    StationEntry {
        city: "Jacksonville",
        aliases: &[],
        icao: "KJAX",
        cli_code: "JAX",
        tz: chrono_tz::America::New_York,
        confidence: MappingConfidence::High,
        notes: &["Jacksonville International Airport"],
        lat: 30.494,
        lon: -81.688,
    },
    StationEntry {
        city: "Minneapolis",
        aliases: &[],
        icao: "KMSP",
        cli_code: "MSP",
        tz: chrono_tz::America::Chicago,
        confidence: MappingConfidence::High,
        notes: &["Minneapolis-Saint Paul International Airport"],
        lat: 44.883,
        lon: -93.229,
    },
    StationEntry {
        city: "Nashville",
        aliases: &[],
        icao: "KBNA",
        cli_code: "BNA",
        tz: chrono_tz::America::Chicago,
        confidence: MappingConfidence::High,
        notes: &["Nashville International Airport"],
        lat: 36.124,
        lon: -86.678,
    },
    StationEntry {
        city: "New Orleans",
        aliases: &[],
        icao: "KMSY",
        cli_code: "MSY",
        tz: chrono_tz::America::Chicago,
        confidence: MappingConfidence::High,
        notes: &["Louis Armstrong New Orleans International Airport"],
        lat: 29.993,
        lon: -90.258,
    },
    StationEntry {
        city: "Oklahoma City",
        aliases: &["OKC"],
        icao: "KOKC",
        cli_code: "OKC",
        tz: chrono_tz::America::Chicago,
        confidence: MappingConfidence::High,
        notes: &["Will Rogers World Airport"],
        lat: 35.393,
        lon: -97.601,
    },
    StationEntry {
        city: "Philadelphia",
        aliases: &["Philly"],
        icao: "KPHL",
        cli_code: "PHL",
        tz: chrono_tz::America::New_York,
        confidence: MappingConfidence::High,
        notes: &["Philadelphia International Airport"],
        lat: 39.872,
        lon: -75.241,
    },
    StationEntry {
        city: "Phoenix",
        aliases: &[],
        icao: "KPHX",
        cli_code: "PHX",
        tz: chrono_tz::America::Phoenix,
        confidence: MappingConfidence::High,
        notes: &["Phoenix Sky Harbor; Arizona does not observe DST"],
        lat: 33.434,
        lon: -112.012,
    },
    StationEntry {
        city: "San Antonio",
        aliases: &[],
        icao: "KSAT",
        cli_code: "SAT",
        tz: chrono_tz::America::Chicago,
        confidence: MappingConfidence::High,
        notes: &["San Antonio International Airport"],
        lat: 29.534,
        lon: -98.470,
    },
    StationEntry {
        city: "San Francisco",
        aliases: &["SF"],
        icao: "KSFO",
        cli_code: "SFO",
        tz: chrono_tz::America::Los_Angeles,
        confidence: MappingConfidence::High,
        notes: &["San Francisco International Airport"],
        lat: 37.619,
        lon: -122.375,
    },
    StationEntry {
        city: "Tampa",
        aliases: &[],
        icao: "KTPA",
        cli_code: "TPA",
        tz: chrono_tz::America::New_York,
        confidence: MappingConfidence::High,
        notes: &["Tampa International Airport"],
        lat: 27.963,
        lon: -82.537,
    },
    StationEntry {
        city: "Washington",
        aliases: &["Washington D.C.", "DC", "Washington DC"],
        icao: "KDCA",
        cli_code: "DCA",
        tz: chrono_tz::America::New_York,
        confidence: MappingConfidence::High,
        notes: &["Reagan National Airport"],
        lat: 38.852,
        lon: -77.034,
    },
    StationEntry {
        city: "LaGuardia",
        aliases: &["LGA"],
        icao: "KLGA",
        cli_code: "LGA",
        tz: chrono_tz::America::New_York,
        confidence: MappingConfidence::Med,
        notes: &[
            "LaGuardia Airport; less common Kalshi market",
            "Verify ticker mapping before trading",
        ],
        lat: 40.777,
        lon: -73.873,
    },
];

lazy_static! {
    static ref CITY_INDEX: HashMap<String, &'static StationEntry> = {
        let mut index = HashMap::new();
        for entry in STATION_DB {
            index.insert(entry.city.to_lowercase(), entry);
            for alias in entry.aliases {
                index.insert(alias.to_lowercase(), entry);
            }
        }
        index
    };
}

/// Substring match that requires at least 4 chars on both sides, so that
/// e.g. "LA" never matches inside "Atlanta".
fn safe_substring_match(key: &str, candidate: &str) -> bool {
    if key.len() < 4 || candidate.len() < 4 {
        return false;
    }
    key.contains(candidate) || candidate.contains(key)
}

/// Look up a station by city name: case-insensitive, alias-aware, with a
/// guarded substring fallback.
pub fn lookup_station(city: &str) -> Option<&'static StationEntry> {
    let key = city.trim().to_lowercase();
    if let Some(entry) = CITY_INDEX.get(&key) {
        return Some(entry);
    }
    for (idx_key, entry) in CITY_INDEX.iter() {
        if safe_substring_match(&key, idx_key) {
            return Some(entry);
        }
    }
    None
}

pub fn station_timezone(city: &str) -> Option<Tz> {
    lookup_station(city).map(|e| e.tz)
}

pub fn station_icao(city: &str) -> Option<&'static str> {
    lookup_station(city).map(|e| e.icao)
}

/// Compute the NWS CLI climate-day window for a date and zone.
///
/// The CLI day runs midnight to midnight in local STANDARD time; during
/// DST the UTC window shifts but the LST window stays fixed. The standard
/// offset is taken from January 1 of that year (always standard time in
/// the US). Returns the half-open `[start_utc, end_utc)` interval.
pub fn cli_day_window(target_date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let jan1 = NaiveDate::from_ymd_opt(target_date.year(), 1, 1)
        .expect("January 1 is a valid date")
        .and_time(NaiveTime::MIN);
    let std_offset_secs = match tz.offset_from_local_datetime(&jan1) {
        LocalResult::Single(off) => off.fix().local_minus_utc(),
        LocalResult::Ambiguous(off, _) => off.fix().local_minus_utc(),
        LocalResult::None => tz.offset_from_utc_datetime(&jan1).fix().local_minus_utc(),
    };

    let start_lst = target_date.and_time(NaiveTime::MIN);
    let start_utc =
        Utc.from_utc_datetime(&(start_lst - chrono::Duration::seconds(std_offset_secs as i64)));
    (start_utc, start_utc + chrono::Duration::days(1))
}

/// Build a SettlementSpec for a city + market type. An unmapped city gets
/// a LOW-confidence spec that the selection pipeline will hard-reject.
pub fn build_settlement_spec(
    city: &str,
    market_type: MarketType,
    target_date: Option<NaiveDate>,
) -> SettlementSpec {
    let Some(entry) = lookup_station(city) else {
        return SettlementSpec {
            city: city.to_string(),
            market_type,
            issuedby: "UNKNOWN".to_string(),
            cli_url: String::new(),
            what_to_read_in_cli: "UNKNOWN".to_string(),
            day_window_note: "Cannot determine — city not in station database".to_string(),
            special_risks: vec!["UNMAPPED CITY — cannot determine settlement source".to_string()],
            mapping_confidence: MappingConfidence::Low,
            mapping_notes: vec![format!("City '{city}' not found in station database")],
        };
    };

    let cli_field = match market_type {
        MarketType::HighTemp => CLI_FIELD_HIGH,
        MarketType::LowTemp => CLI_FIELD_LOW,
    };

    let day_window_note = match target_date {
        Some(date) => {
            let (start_utc, end_utc) = cli_day_window(date, entry.tz);
            format!(
                "CLI day = midnight-midnight LST ({}); UTC window: {}Z — {}Z",
                entry.tz,
                start_utc.format("%H:%M"),
                end_utc.format("%H:%M"),
            )
        }
        None => format!("CLI day = midnight-midnight LST ({})", entry.tz),
    };

    let mut special_risks: Vec<String> = entry.notes.iter().map(|n| n.to_string()).collect();
    if entry.tz == chrono_tz::America::Phoenix {
        special_risks.push("Arizona does not observe DST — no LST/LDT shift".to_string());
    }

    SettlementSpec {
        city: city.to_string(),
        market_type,
        issuedby: entry.cli_code.to_string(),
        cli_url: format!("{CLI_URL_TEMPLATE}{}", entry.cli_code),
        what_to_read_in_cli: cli_field.to_string(),
        day_window_note,
        special_risks,
        mapping_confidence: entry.confidence,
        mapping_notes: vec![format!("Station: {} ({})", entry.icao, entry.city)],
    }
}
