//! Simulation form: the choices the generated script is built from.
//!
//! Every section and field has a default, so an empty TOML file (or no
//! file at all) describes a complete simulation.

use crate::errors::ConfigError;
use crate::units::{Dimension, Quantity, Unit};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Declares a string-backed choice list whose values are file names.
macro_rules! file_choice {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $file:literal),+ $(,)? } default $default:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
        #[serde(try_from = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn file_name(self) -> &'static str {
                match self {
                    $($name::$variant => $file),+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.file_name())
            }
        }

        impl TryFrom<String> for $name {
            type Error = ConfigError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|choice| choice.file_name() == value)
                    .ok_or_else(|| {
                        let known: Vec<&str> = $name::ALL.iter().map(|c| c.file_name()).collect();
                        ConfigError::Invalid {
                            field: stringify!($name),
                            message: format!("unknown file '{}' (expected one of {})", value, known.join(", ")),
                        }
                    })
            }
        }
    };
}

file_choice! {
    /// AMBER protein forcefields shipped with OpenMM.
    ProteinForcefield {
        Amber03 => "amber03.xml",
        Amber03Gbvi => "amber03_gbvi.xml",
        Amber03Obc => "amber03_obc.xml",
        Amber10 => "amber10.xml",
        Amber10Gbvi => "amber10_gbvi.xml",
        Amber10Obc => "amber10_obc.xml",
        Amber96 => "amber96.xml",
        Amber96Gbvi => "amber96_gbvi.xml",
        Amber96Obc => "amber96_obc.xml",
        Amber99Gbvi => "amber99_gbvi.xml",
        Amber99Obc => "amber99_obc.xml",
        Amber99sb => "amber99sb.xml",
        Amber99sbIldn => "amber99sbildn.xml",
        Amber99sbNmr => "amber99sbnmr.xml",
    } default Amber99sb
}

file_choice! {
    WaterModel {
        Spce => "spce.xml",
        Tip3p => "tip3p.xml",
        Tip4pew => "tip4pew.xml",
        Tip5p => "tip5p.xml",
    } default Tip3p
}

impl ProteinForcefield {
    /// Implicit-solvent forcefields bring their own water model.
    pub fn is_implicit_solvent(self) -> bool {
        let name = self.file_name();
        name.contains("gbvi") || name.contains("obc")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
pub enum IntegratorKind {
    Verlet,
    #[default]
    Langevin,
    Brownian,
}

impl IntegratorKind {
    /// OpenMM class implementing this integrator.
    pub fn class_name(self) -> &'static str {
        match self {
            IntegratorKind::Verlet => "VerletIntegrator",
            IntegratorKind::Langevin => "LangevinIntegrator",
            IntegratorKind::Brownian => "BrownianIntegrator",
        }
    }

    pub fn is_stochastic(self) -> bool {
        matches!(self, IntegratorKind::Langevin | IntegratorKind::Brownian)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum NonbondedMethod {
    NoCutoff,
    CutoffNonPeriodic,
    CutoffPeriodic,
    Ewald,
    #[default]
    PME,
}

impl NonbondedMethod {
    pub fn name(self) -> &'static str {
        match self {
            NonbondedMethod::NoCutoff => "NoCutoff",
            NonbondedMethod::CutoffNonPeriodic => "CutoffNonPeriodic",
            NonbondedMethod::CutoffPeriodic => "CutoffPeriodic",
            NonbondedMethod::Ewald => "Ewald",
            NonbondedMethod::PME => "PME",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Constraints {
    #[default]
    None,
    HBonds,
    HAngles,
    AllBonds,
}

impl Constraints {
    pub fn name(self) -> &'static str {
        match self {
            Constraints::None => "None",
            Constraints::HBonds => "HBonds",
            Constraints::HAngles => "HAngles",
            Constraints::AllBonds => "AllBonds",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputSection {
    /// PDB file to simulate.
    pub file: PathBuf,
}

impl Default for InputSection {
    fn default() -> Self {
        Self {
            file: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForcefieldSection {
    pub protein: ProteinForcefield,
    pub water: WaterModel,
}

impl ForcefieldSection {
    pub fn water_active(&self) -> bool {
        !self.protein.is_implicit_solvent()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntegratorSection {
    pub kind: IntegratorKind,
    pub timestep: Quantity,
    pub temperature: Quantity,
    pub friction: Quantity,
}

impl Default for IntegratorSection {
    fn default() -> Self {
        Self {
            kind: IntegratorKind::default(),
            timestep: Quantity::new(2.0, Unit::Femtosecond),
            temperature: Quantity::new(300.0, Unit::Kelvin),
            friction: Quantity::per(91.0, Unit::Picosecond),
        }
    }
}

impl IntegratorSection {
    pub fn stochastic_active(&self) -> bool {
        self.kind.is_stochastic()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemSection {
    pub nonbonded_method: NonbondedMethod,
    pub nonbonded_cutoff: Quantity,
    pub constraints: Constraints,
    pub rigid_water: bool,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            nonbonded_method: NonbondedMethod::default(),
            nonbonded_cutoff: Quantity::new(1.0, Unit::Nanometer),
            constraints: Constraints::default(),
            rigid_water: true,
        }
    }
}

impl SystemSection {
    pub fn nonbonded_cutoff_active(&self) -> bool {
        self.nonbonded_method != NonbondedMethod::NoCutoff
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportersSection {
    pub dcd_active: bool,
    pub dcd_freq: u32,
    pub dcd_out: String,
    pub statedata_active: bool,
    pub statedata_freq: u32,
}

impl Default for ReportersSection {
    fn default() -> Self {
        Self {
            dcd_active: true,
            dcd_freq: 100,
            dcd_out: "output.dcd".to_string(),
            statedata_active: true,
            statedata_freq: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationSection {
    pub n_steps: u64,
    pub minimize: bool,
    pub minimize_max_iters: u32,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            n_steps: 1000,
            minimize: true,
            minimize_max_iters: 100,
        }
    }
}

/// The whole form.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormConfig {
    pub input: InputSection,
    pub forcefield: ForcefieldSection,
    pub integrator: IntegratorSection,
    pub system: SystemSection,
    pub reporters: ReportersSection,
    pub simulation: SimulationSection,
}

impl FormConfig {
    /// Read a TOML form and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: FormConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot: unit dimensions, output names, frequencies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let integrator = &self.integrator;
        integrator.timestep.require(Dimension::Time)?;
        if integrator.timestep.value <= 0.0 {
            return Err(ConfigError::invalid("integrator.timestep", "must be positive"));
        }
        if integrator.stochastic_active() {
            integrator.temperature.require(Dimension::Temperature)?;
            integrator.friction.require(Dimension::InverseTime)?;
        }
        if self.system.nonbonded_cutoff_active() {
            self.system.nonbonded_cutoff.require(Dimension::Length)?;
        }

        let reporters = &self.reporters;
        if reporters.dcd_active {
            if !is_dcd_name(&reporters.dcd_out) {
                return Err(ConfigError::invalid(
                    "reporters.dcd_out",
                    format!("'{}' must be a file name ending in .dcd", reporters.dcd_out),
                ));
            }
            if reporters.dcd_freq == 0 {
                return Err(ConfigError::invalid("reporters.dcd_freq", "must be at least 1"));
            }
        }
        if reporters.statedata_active && reporters.statedata_freq == 0 {
            return Err(ConfigError::invalid("reporters.statedata_freq", "must be at least 1"));
        }
        Ok(())
    }
}

/// At least one character, then `.dcd`.
fn is_dcd_name(name: &str) -> bool {
    name.strip_suffix(".dcd")
        .is_some_and(|stem| !stem.is_empty() && !stem.contains('\n'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_form_takes_defaults() {
        let config: FormConfig = toml::from_str("").unwrap();
        assert_eq!(config.forcefield.protein, ProteinForcefield::Amber99sb);
        assert_eq!(config.forcefield.water, WaterModel::Tip3p);
        assert_eq!(config.integrator.kind, IntegratorKind::Langevin);
        assert_eq!(config.integrator.timestep.to_source(), "2.0*femtosecond");
        assert_eq!(config.integrator.friction.to_source(), "91.0/picosecond");
        assert_eq!(config.system.nonbonded_method, NonbondedMethod::PME);
        assert_eq!(config.system.constraints, Constraints::None);
        assert_eq!(config.reporters.dcd_out, "output.dcd");
        assert_eq!(config.simulation.n_steps, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn derived_flags_follow_choices() {
        let mut config = FormConfig::default();
        assert!(config.forcefield.water_active());
        config.forcefield.protein = ProteinForcefield::Amber03Obc;
        assert!(!config.forcefield.water_active());
        config.forcefield.protein = ProteinForcefield::Amber10Gbvi;
        assert!(!config.forcefield.water_active());

        assert!(config.integrator.stochastic_active());
        config.integrator.kind = IntegratorKind::Verlet;
        assert!(!config.integrator.stochastic_active());
        config.integrator.kind = IntegratorKind::Brownian;
        assert!(config.integrator.stochastic_active());

        assert!(config.system.nonbonded_cutoff_active());
        config.system.nonbonded_method = NonbondedMethod::NoCutoff;
        assert!(!config.system.nonbonded_cutoff_active());
    }

    #[test]
    fn fourteen_protein_forcefields() {
        assert_eq!(ProteinForcefield::ALL.len(), 14);
        let implicit = ProteinForcefield::ALL
            .iter()
            .filter(|p| p.is_implicit_solvent())
            .count();
        assert_eq!(implicit, 8);
    }

    #[test]
    fn parses_sections() {
        let config: FormConfig = toml::from_str(
            r#"
            [forcefield]
            protein = "amber03_gbvi.xml"
            water = "spce.xml"

            [integrator]
            kind = "Verlet"
            timestep = "1 fs"

            [system]
            nonbonded_method = "NoCutoff"
            constraints = "HBonds"

            [simulation]
            n_steps = 50
            minimize = false
            "#,
        )
        .unwrap();
        assert_eq!(config.forcefield.protein, ProteinForcefield::Amber03Gbvi);
        assert_eq!(config.forcefield.water, WaterModel::Spce);
        assert_eq!(config.integrator.kind, IntegratorKind::Verlet);
        assert_eq!(config.integrator.timestep, Quantity::new(1.0, Unit::Femtosecond));
        assert_eq!(config.system.constraints, Constraints::HBonds);
        assert_eq!(config.simulation.n_steps, 50);
        assert!(!config.simulation.minimize);
        assert_eq!(config.simulation.minimize_max_iters, 100);
    }

    #[test]
    fn rejects_unknown_choices_and_fields() {
        assert!(toml::from_str::<FormConfig>("[forcefield]\nprotein = \"charmm36.xml\"").is_err());
        assert!(toml::from_str::<FormConfig>("[integrator]\nkind = \"Euler\"").is_err());
        assert!(toml::from_str::<FormConfig>("[simulation]\nsteps = 5").is_err());
    }

    #[test]
    fn validate_checks_dimensions() {
        let mut config = FormConfig::default();
        config.integrator.timestep = Quantity::new(300.0, Unit::Kelvin);
        assert!(matches!(config.validate(), Err(ConfigError::Unit { .. })));

        let mut config = FormConfig::default();
        config.integrator.friction = Quantity::new(1.0, Unit::Picosecond);
        assert!(config.validate().is_err());
        // friction is unused by Verlet
        config.integrator.kind = IntegratorKind::Verlet;
        assert!(config.validate().is_ok());

        let mut config = FormConfig::default();
        config.system.nonbonded_cutoff = Quantity::new(2.0, Unit::Femtosecond);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_checks_dcd_output_name() {
        let mut config = FormConfig::default();
        for bad in [".dcd", "output.pdb", "output", "output.dcd.bak"] {
            config.reporters.dcd_out = bad.to_string();
            assert!(config.validate().is_err(), "{bad}");
        }
        config.reporters.dcd_active = false;
        assert!(config.validate().is_ok());
        config.reporters.dcd_active = true;
        config.reporters.dcd_out = "traj/run1.dcd".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reads_and_validates_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[input]\nfile = \"protein.pdb\"\n[reporters]\nstatedata_freq = 10").unwrap();
        let config = FormConfig::load(file.path()).unwrap();
        assert_eq!(config.input.file, PathBuf::from("protein.pdb"));
        assert_eq!(config.reporters.statedata_freq, 10);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[reporters]\ndcd_out = \"out.xtc\"").unwrap();
        assert!(matches!(
            FormConfig::load(bad.path()),
            Err(ConfigError::Invalid { field: "reporters.dcd_out", .. })
        ));

        assert!(matches!(
            FormConfig::load(Path::new("/nonexistent/form.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
