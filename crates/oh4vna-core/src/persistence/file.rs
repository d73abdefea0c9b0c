//! File-backed repository
//!
//! Layout under the root directory:
//!
//! ```text
//! touchstone/meas_<ts>_<id8>.s<N>p
//! metadata/measurements/meas_<ts>_<id8>.json
//! metadata/calibrations/cal_<ts>_<id>.json
//! metadata/calibration_kits/<kit>_SN<serial>_<import date>[_n]/kit.json
//! ```
//!
//! `<ts>` is the UTC timestamp as `%Y%m%d_%H%M%S`. Tabulated standard data
//! lives next to `kit.json` as one Touchstone file per standard.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use num_complex::Complex64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{MeasurementMetadata, Repository, StoredMeasurement};
use crate::calibration::{
    CalibrationKit, CalibrationRecord, KitRef, ParametricStandard, StandardDefinition, StandardKind,
    StandardModel,
};
use crate::error::PersistenceError;
use crate::frequency::Frequency;
use crate::network::Network;
use crate::touchstone::SParamFormat;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";
const KIT_MANIFEST: &str = "kit.json";

/// Keep alphanumerics, upper-case, and zero-pad short numeric serials to 4
/// digits. An empty serial becomes `0000`.
pub fn normalize_serial(serial: &str) -> String {
    let cleaned: String = serial
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.is_empty() {
        "0000".to_string()
    } else if cleaned.chars().all(|c| c.is_ascii_digit()) && cleaned.len() < 4 {
        format!("{:0>4}", cleaned)
    } else {
        cleaned
    }
}

/// Filesystem-safe kit identifier
fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "cal-kit".to_string()
    } else {
        slug.to_string()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ManifestModel {
    Ideal(Complex64),
    Parametric(ParametricStandard),
    /// Touchstone file next to the manifest; the exact sweep is kept here
    /// because Touchstone frequencies are written in display units
    Tabulated { file: String, sweep: Frequency },
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestStandard {
    kind: StandardKind,
    model: ManifestModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    override_data: Option<ManifestModel>,
}

/// `kit.json`
#[derive(Debug, Serialize, Deserialize)]
struct KitManifest {
    id: String,
    name: String,
    serial: String,
    calibration_date: NaiveDate,
    revision: u32,
    imported_at: DateTime<Utc>,
    standards: Vec<ManifestStandard>,
}

/// Repository writing JSON sidecars and Touchstone files under one root
#[derive(Debug, Clone)]
pub struct FileRepository {
    root: PathBuf,
}

impl FileRepository {
    /// Open a repository, creating its directory layout if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let repo = Self { root: root.into() };
        for dir in [
            repo.touchstone_dir(),
            repo.measurements_dir(),
            repo.calibrations_dir(),
            repo.kits_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
        }
        debug!(root = %repo.root.display(), "file repository opened");
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn touchstone_dir(&self) -> PathBuf {
        self.root.join("touchstone")
    }

    fn measurements_dir(&self) -> PathBuf {
        self.root.join("metadata").join("measurements")
    }

    fn calibrations_dir(&self) -> PathBuf {
        self.root.join("metadata").join("calibrations")
    }

    fn kits_dir(&self) -> PathBuf {
        self.root.join("metadata").join("calibration_kits")
    }

    /// Archive a kit as a new immutable instance.
    ///
    /// The serial is normalized and the revision is one past the highest
    /// revision already archived for the same id and serial. The archived
    /// kit is returned.
    pub fn import_kit(&self, kit: &CalibrationKit) -> Result<CalibrationKit, PersistenceError> {
        let serial = normalize_serial(kit.serial());
        let revision = self
            .list_kits()?
            .iter()
            .filter(|k| k.id() == kit.id() && k.serial() == serial)
            .map(CalibrationKit::revision)
            .max()
            .map_or(kit.revision(), |r| r + 1);

        let imported_at = Utc::now();
        let base = format!("{}_SN{}_{}", slugify(kit.id()), serial, imported_at.format("%Y%m%d"));
        let dir = unique_dir(&self.kits_dir(), &base);
        fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;

        let mut standards = Vec::new();
        for def in kit.standards() {
            let name = def.kind().to_string();
            standards.push(ManifestStandard {
                kind: def.kind(),
                model: write_model(&dir, &name, def.model())?,
                override_data: def
                    .override_data()
                    .map(|net| write_tabulated(&dir, &format!("{}_override", name), net))
                    .transpose()?,
            });
        }

        let manifest = KitManifest {
            id: kit.id().to_string(),
            name: kit.name().to_string(),
            serial,
            calibration_date: kit.calibration_date(),
            revision,
            imported_at,
            standards,
        };
        write_json(&dir.join(KIT_MANIFEST), &manifest)?;
        let archived = read_kit(&dir)?;
        info!(kit = %archived.reference(), dir = %dir.display(), "calibration kit archived");
        Ok(archived)
    }

    /// Every archived kit, ordered by id, serial and revision
    pub fn list_kits(&self) -> Result<Vec<CalibrationKit>, PersistenceError> {
        let mut kits = Vec::new();
        for dir in sorted_entries(&self.kits_dir())? {
            if !dir.join(KIT_MANIFEST).is_file() {
                continue;
            }
            match read_kit(&dir) {
                Ok(kit) => kits.push(kit),
                Err(e) => warn!(dir = %dir.display(), error = %e, "skipping unreadable kit"),
            }
        }
        kits.sort_by(|a, b| {
            (a.id(), a.serial(), a.revision()).cmp(&(b.id(), b.serial(), b.revision()))
        });
        Ok(kits)
    }

    pub fn load_kit(&self, reference: &KitRef) -> Result<CalibrationKit, PersistenceError> {
        self.list_kits()?
            .into_iter()
            .find(|k| k.reference() == *reference)
            .ok_or_else(|| PersistenceError::NotFound(format!("calibration kit {}", reference)))
    }

    /// Highest revision of kit `id`
    pub fn latest_kit(&self, id: &str) -> Result<Option<CalibrationKit>, PersistenceError> {
        Ok(self
            .list_kits()?
            .into_iter()
            .filter(|k| k.id() == id)
            .max_by_key(|k| (k.revision(), k.calibration_date())))
    }

    /// The ideal quick-start kit, archived on first use
    pub fn ensure_default_kit(&self) -> Result<CalibrationKit, PersistenceError> {
        let ideal = CalibrationKit::ideal_osl();
        match self.latest_kit(ideal.id())? {
            Some(kit) => Ok(kit),
            None => self.import_kit(&ideal),
        }
    }

    /// Files in `dir` named `<prefix>..<suffix>`, newest first
    fn find_files(
        &self,
        dir: &Path,
        prefix: &str,
        suffix: &str,
    ) -> Result<Vec<PathBuf>, PersistenceError> {
        Ok(sorted_entries(dir)?
            .into_iter()
            .rev()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix) && n.ends_with(suffix))
            })
            .collect())
    }

    fn find_file(
        &self,
        dir: &Path,
        prefix: &str,
        suffix: &str,
    ) -> Result<Option<PathBuf>, PersistenceError> {
        Ok(self.find_files(dir, prefix, suffix)?.into_iter().next())
    }

    fn list_json<T: DeserializeOwned>(
        &self,
        dir: &Path,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<T>, PersistenceError> {
        let mut out = Vec::new();
        for path in sorted_entries(dir)?.into_iter().rev() {
            if out.len() >= limit {
                break;
            }
            let is_match = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix) && n.ends_with(".json"));
            if !is_match {
                continue;
            }
            match read_json(&path) {
                Ok(value) => out.push(value),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable record")
                }
            }
        }
        Ok(out)
    }

    fn measurement_stem(metadata: &MeasurementMetadata) -> String {
        let id = metadata.id.simple().to_string();
        format!("meas_{}_{}", metadata.timestamp.format(TIMESTAMP_FORMAT), &id[..8])
    }

    fn read_measurement(
        &self,
        metadata: MeasurementMetadata,
    ) -> Result<StoredMeasurement, PersistenceError> {
        let ts_path = self
            .touchstone_dir()
            .join(format!("{}.s{}p", Self::measurement_stem(&metadata), metadata.port_count));
        let parsed = Network::from_touchstone(&ts_path)?;
        // rebuild on the exact sweep from the sidecar
        let network =
            Network::new(metadata.sweep.clone(), parsed.s().clone(), parsed.z0().clone())?
                .with_comments(parsed.comments().to_vec());
        metadata.ensure_describes(&network)?;
        Ok(StoredMeasurement { metadata, network })
    }
}

impl Repository for FileRepository {
    fn store_calibration_record(
        &self,
        record: &CalibrationRecord,
    ) -> Result<Uuid, PersistenceError> {
        let path = self.calibrations_dir().join(format!(
            "cal_{}_{}.json",
            record.created_at().format(TIMESTAMP_FORMAT),
            record.id()
        ));
        write_json(&path, record)?;
        info!(id = %record.id(), kit = %record.kit(), path = %path.display(), "calibration stored");
        Ok(record.id())
    }

    fn load_calibration_record(&self, id: Uuid) -> Result<CalibrationRecord, PersistenceError> {
        let path = self
            .find_file(&self.calibrations_dir(), "cal_", &format!("_{}.json", id))?
            .ok_or_else(|| PersistenceError::NotFound(format!("calibration {}", id)))?;
        read_json(&path)
    }

    fn list_calibrations(&self, limit: usize) -> Result<Vec<CalibrationRecord>, PersistenceError> {
        self.list_json(&self.calibrations_dir(), "cal_", limit)
    }

    fn store_measurement(
        &self,
        network: &Network,
        metadata: &MeasurementMetadata,
    ) -> Result<Uuid, PersistenceError> {
        metadata.ensure_describes(network)?;
        let stem = Self::measurement_stem(metadata);

        let state = match metadata.calibration.calibration_id() {
            Some(id) => format!("calibration {}", id),
            None => "uncalibrated".to_string(),
        };
        let ts_path = self
            .touchstone_dir()
            .join(format!("{}.{}", stem, network.touchstone_extension()));
        network
            .clone()
            .with_comments(vec![format!("OH4VNA measurement {}", metadata.id), state])
            .write_touchstone(&ts_path, SParamFormat::RI)?;
        write_json(&self.measurements_dir().join(format!("{}.json", stem)), metadata)?;

        info!(id = %metadata.id, path = %ts_path.display(), "measurement stored");
        Ok(metadata.id)
    }

    fn load_measurement(&self, id: Uuid) -> Result<StoredMeasurement, PersistenceError> {
        // file names carry only the first 8 hex digits, so prefixes can collide
        let suffix = format!("_{}.json", &id.simple().to_string()[..8]);
        for meta_path in self.find_files(&self.measurements_dir(), "meas_", &suffix)? {
            let metadata: MeasurementMetadata = read_json(&meta_path)?;
            if metadata.id == id {
                return self.read_measurement(metadata);
            }
        }
        Err(PersistenceError::NotFound(format!("measurement {}", id)))
    }

    fn list_measurements(
        &self,
        limit: usize,
    ) -> Result<Vec<MeasurementMetadata>, PersistenceError> {
        self.list_json(&self.measurements_dir(), "meas_", limit)
    }
}


fn write_model(
    dir: &Path,
    name: &str,
    model: &StandardModel,
) -> Result<ManifestModel, PersistenceError> {
    Ok(match model {
        StandardModel::Ideal(value) => ManifestModel::Ideal(*value),
        StandardModel::Parametric(p) => ManifestModel::Parametric(*p),
        StandardModel::Tabulated(net) => write_tabulated(dir, name, net)?,
    })
}

fn write_tabulated(
    dir: &Path,
    name: &str,
    network: &Network,
) -> Result<ManifestModel, PersistenceError> {
    let file = format!("{}.{}", name, network.touchstone_extension());
    network.write_touchstone(dir.join(&file), SParamFormat::RI)?;
    Ok(ManifestModel::Tabulated {
        file,
        sweep: network.frequency().clone(),
    })
}

fn read_model(dir: &Path, model: ManifestModel) -> Result<StandardModel, PersistenceError> {
    Ok(match model {
        ManifestModel::Ideal(value) => StandardModel::Ideal(value),
        ManifestModel::Parametric(p) => StandardModel::Parametric(p),
        ManifestModel::Tabulated { file, sweep } => {
            let parsed = Network::from_touchstone(dir.join(&file))?;
            StandardModel::Tabulated(Network::new(sweep, parsed.s().clone(), parsed.z0().clone())?)
        }
    })
}

fn read_kit(dir: &Path) -> Result<CalibrationKit, PersistenceError> {
    let manifest: KitManifest = read_json(&dir.join(KIT_MANIFEST))?;
    let invalid = |e: crate::error::CalibrationError| {
        PersistenceError::InvalidKit(format!("{}: {}", dir.display(), e))
    };

    let mut standards = Vec::with_capacity(manifest.standards.len());
    for entry in manifest.standards {
        let model = read_model(dir, entry.model)?;
        let mut def = StandardDefinition::new(entry.kind, model).map_err(invalid)?;
        if let Some(data) = entry.override_data {
            match read_model(dir, data)? {
                StandardModel::Tabulated(net) => def = def.with_override(net).map_err(invalid)?,
                _ => {
                    return Err(PersistenceError::InvalidKit(format!(
                        "{}: {} override must be tabulated",
                        dir.display(),
                        entry.kind
                    )))
                }
            }
        }
        standards.push(def);
    }

    Ok(CalibrationKit::new(
        manifest.id,
        manifest.name,
        manifest.serial,
        manifest.calibration_date,
        standards,
    )
    .with_revision(manifest.revision))
}

fn unique_dir(parent: &Path, base: &str) -> PathBuf {
    let mut candidate = parent.join(base);
    let mut n = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{}_{}", base, n));
        n += 1;
    }
    candidate
}

/// Directory entries sorted by file name
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, PersistenceError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| PersistenceError::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PersistenceError::io(dir, e))?;
    entries.sort();
    Ok(entries)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes).map_err(|e| PersistenceError::io(path, e))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let bytes = fs::read(path).map_err(|e| PersistenceError::io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}
