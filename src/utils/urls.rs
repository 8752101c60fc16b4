use crate::utils::constants::{CATALOG_URL, OPENDATA_BASE_URL};
use chrono::{DateTime, Utc};
use clap::ValueEnum;

/// The two published bulletin flavors. The short variant carries a reduced
/// variable set out to 240 hours; the long variant the full set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BulletinVariant {
    MosmixS,
    MosmixL,
}

impl BulletinVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulletinVariant::MosmixS => "mosmix_s",
            BulletinVariant::MosmixL => "mosmix_l",
        }
    }
}

/// URL of the all-stations bulletin for the run hour containing `at`.
///
/// The feed names files by the UTC run hour, so the minute and second
/// components of `at` are irrelevant.
pub fn bulletin_url(variant: BulletinVariant, at: DateTime<Utc>) -> String {
    let timestamp = at.format("%Y%m%d%H");
    match variant {
        BulletinVariant::MosmixS => format!(
            "{}/MOSMIX_S/all_stations/kml/MOSMIX_S_{}_240.kmz",
            OPENDATA_BASE_URL, timestamp
        ),
        BulletinVariant::MosmixL => format!(
            "{}/MOSMIX_L/all_stations/kml/MOSMIX_L_{}.kmz",
            OPENDATA_BASE_URL, timestamp
        ),
    }
}

/// URL of the variable-definition catalog feed.
pub fn catalog_url() -> String {
    CATALOG_URL.to_string()
}
