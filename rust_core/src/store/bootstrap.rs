//! Businesses launched by the seed wallet at genesis.

use crate::models::{BusinessMetadata, Sector};

const GENESIS: &[(&str, &str, Sector, &str, &str)] = &[
    ("DUST", "Red Dust Mining", Sector::Mining, "Extracting rare earth metals from the Tharsis region.", "Tharsis Rise"),
    ("SOLR", "Olympus Energy", Sector::Energy, "Orbital mirror arrays providing 24/7 solar power.", "Olympus Mons"),
    ("H2O", "Valles Water Corp", Sector::Terraforming, "Deep crust aquifer drilling logistics.", "Valles Marineris"),
    ("SHIP", "Phobos Transport", Sector::Logistics, "High-speed maglev connection between colonies.", "Phobos"),
    ("BIO", "TerraLabs Bio", Sector::Tech, "Genetically modified lichen for rapid oxygenation.", "Hellas Basin"),
    ("LAND", "Martian Realty", Sector::Governance, "Prime crater real estate tokenization.", "Global"),
    ("IRON", "Iron Sands Ltd", Sector::Mining, "Ferrous oxide refinement at scale.", "Gusev Crater"),
    ("SEC", "Ares Security", Sector::Tech, "Automated drone defense for remote outposts.", "Ares Vallis"),
    ("GRO", "Green Dome Inc", Sector::Terraforming, "Hydroponic mega-structures for food independence.", "Amazonis"),
    ("HE3", "Helium-3 Ventures", Sector::Energy, "Fusion fuel extraction and processing.", "South Pole"),
    ("COMM", "Canyon Echo Comms", Sector::Tech, "Subsurface neutrino communication network.", "Valles Marineris"),
    ("ROVR", "Rover Logistics", Sector::Logistics, "Autonomous heavy haulers for mining ops.", "Jezero Crater"),
    ("ICE", "Polar Iceworks", Sector::Mining, "Harvesting the northern polar caps.", "North Pole"),
    ("AIR", "Atmosphere Gen", Sector::Terraforming, "Industrial CO2 scrubbers and N2 release.", "Atmosphere"),
    ("HEAT", "Core Geothermal", Sector::Energy, "Deep bore geothermal taps.", "Cerberus Fossae"),
    ("VOTE", "DAO Governance", Sector::Governance, "Decentralized colony management solutions.", "Global"),
    ("ION", "Xenon Propulsion", Sector::Tech, "Next-gen ion drives for inter-moon transit.", "Orbit"),
    ("BLD", "Regolith Bricks", Sector::Mining, "Sintered regolith for radiation-proof housing.", "Cydonia"),
    ("LIFT", "SkyHook Elevators", Sector::Logistics, "Space elevator tether maintenance.", "Equator"),
    ("BLUE", "Blue Origin Mars", Sector::Logistics, "Legacy transport contracts.", "Landing Zone 1"),
];

/// Static bootstrap list, used to seed an empty backend and as the
/// fallback when the backend is unreachable
pub fn genesis_businesses() -> Vec<BusinessMetadata> {
    GENESIS
        .iter()
        .map(|(ticker, name, sector, description, region)| {
            BusinessMetadata::new(ticker, name, *sector, description, region)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_genesis_tickers_unique_and_short() {
        let list = genesis_businesses();
        assert_eq!(list.len(), 20);
        let tickers: HashSet<_> = list.iter().map(|b| b.ticker.as_str()).collect();
        assert_eq!(tickers.len(), list.len());
        assert!(list.iter().all(|b| (1..=9).contains(&b.ticker.len())));
    }
}
