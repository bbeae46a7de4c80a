//! Durable record store boundary.
//!
//! The live engine is memory-resident. Vehicles are loaded once when a
//! [`crate::Fleet`] opens and saved when it is persisted at shutdown; nothing
//! is written while the engine is running.

use crate::error::{FleetError, Result};
use crate::types::{Vehicle, VehicleId};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the fleet image.
const IMAGE_MAGIC: &[u8; 4] = b"FLT\0";

/// Current image format version.
const IMAGE_VERSION: u8 = 1;

/// Header length (magic + version).
const HEADER_LEN: u64 = 5;

/// Upper bound on a single encoded vehicle.
const MAX_ENTRY_BYTES: usize = 1024 * 1024;

/// Load/save access to wherever vehicles are kept between runs.
pub trait VehicleRepository: Send + Sync {
    /// All stored vehicles. Later saves of the same id win.
    fn load(&self) -> Result<Vec<Vehicle>>;

    /// Store one vehicle.
    fn save(&self, vehicle: &Vehicle) -> Result<()>;

    /// Replace everything stored with exactly `vehicles`.
    fn replace_all(&self, vehicles: &[Vehicle]) -> Result<()>;

    /// Make preceding saves durable.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Repository kept in memory, for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryRepository {
    vehicles: RwLock<BTreeMap<VehicleId, Vehicle>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate, as an administrative CRUD layer would.
    pub fn with_vehicles(vehicles: impl IntoIterator<Item = Vehicle>) -> Self {
        Self {
            vehicles: RwLock::new(vehicles.into_iter().map(|v| (v.id.clone(), v)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.vehicles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.read().is_empty()
    }

    pub fn get(&self, id: &VehicleId) -> Option<Vehicle> {
        self.vehicles.read().get(id).cloned()
    }
}

impl VehicleRepository for MemoryRepository {
    fn load(&self) -> Result<Vec<Vehicle>> {
        Ok(self.vehicles.read().values().cloned().collect())
    }

    fn save(&self, vehicle: &Vehicle) -> Result<()> {
        self.vehicles
            .write()
            .insert(vehicle.id.clone(), vehicle.clone());
        Ok(())
    }

    fn replace_all(&self, vehicles: &[Vehicle]) -> Result<()> {
        *self.vehicles.write() = vehicles.iter().map(|v| (v.id.clone(), v.clone())).collect();
        Ok(())
    }
}

/// Single-file fleet image.
///
/// Layout: magic, version byte, then one frame per saved vehicle: `u32`
/// little-endian length, MessagePack body, CRC32 of the body. The file is
/// exclusively locked for the lifetime of the repository.
pub struct FileRepository {
    path: PathBuf,
    /// Held for the lock.
    _lock_file: File,
    writer: Mutex<BufWriter<File>>,
}

impl FileRepository {
    /// Open an image, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_file = Self::acquire_lock(&path)?;

        if path.exists() {
            Self::verify_header(&path)?;
        } else {
            Self::write_header(&path)?;
        }

        let writer = BufWriter::new(OpenOptions::new().append(true).open(&path)?);

        Ok(Self {
            path,
            _lock_file: lock_file,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop every saved vehicle.
    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;

        Self::write_header(&self.path)?;
        *writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);

        Ok(())
    }

    fn sibling(path: &Path, suffix: &str) -> PathBuf {
        let mut sibling = path.as_os_str().to_owned();
        sibling.push(suffix);
        PathBuf::from(sibling)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(Self::sibling(path, ".lock"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| FleetError::Locked)?;

        Ok(lock_file)
    }

    fn write_header(path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        file.write_all(IMAGE_MAGIC)?;
        file.write_all(&[IMAGE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_header(path: &Path) -> Result<()> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|_| FleetError::InvalidFormat("Truncated header".into()))?;
        if &magic != IMAGE_MAGIC {
            return Err(FleetError::InvalidFormat("Invalid fleet image magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)
            .map_err(|_| FleetError::InvalidFormat("Truncated header".into()))?;
        if version[0] != IMAGE_VERSION {
            return Err(FleetError::InvalidFormat(format!(
                "Unsupported fleet image version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn write_entry(writer: &mut BufWriter<File>, vehicle: &Vehicle) -> Result<()> {
        let encoded = rmp_serde::to_vec_named(vehicle)?;

        // Never write a frame that `read_entry` would refuse.
        let len = u32::try_from(encoded.len())
            .ok()
            .filter(|&len| len as usize <= MAX_ENTRY_BYTES)
            .ok_or_else(|| {
                FleetError::Serialization(format!(
                    "Vehicle {} encodes to {} bytes, limit is {}",
                    vehicle.id,
                    encoded.len(),
                    MAX_ENTRY_BYTES
                ))
            })?;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&encoded)?;

        let checksum = crc32fast::hash(&encoded);
        writer.write_all(&checksum.to_le_bytes())?;

        Ok(())
    }

    /// Read the next frame. `Ok(None)` at a clean end of file.
    fn read_entry(reader: &mut BufReader<File>) -> Result<Option<Vehicle>> {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_ENTRY_BYTES {
            return Err(FleetError::Corruption("Fleet image entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        let mut checksum_bytes = [0u8; 4];
        reader
            .read_exact(&mut encoded)
            .and_then(|_| reader.read_exact(&mut checksum_bytes))
            .map_err(|_| FleetError::Corruption("Truncated fleet image entry".into()))?;

        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            return Err(FleetError::Corruption("Fleet image checksum mismatch".into()));
        }

        Ok(Some(rmp_serde::from_slice(&encoded)?))
    }
}

impl VehicleRepository for FileRepository {
    fn load(&self) -> Result<Vec<Vehicle>> {
        // Pending saves must be visible to the reader.
        self.writer.lock().flush()?;

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(HEADER_LEN))?;
        let mut reader = BufReader::new(file);

        let mut vehicles = BTreeMap::new();
        while let Some(vehicle) = Self::read_entry(&mut reader)? {
            vehicles.insert(vehicle.id.clone(), vehicle);
        }

        Ok(vehicles.into_values().collect())
    }

    fn save(&self, vehicle: &Vehicle) -> Result<()> {
        let mut writer = self.writer.lock();
        Self::write_entry(&mut writer, vehicle)
    }

    /// Writes a fresh image beside the current one and renames it into
    /// place, so a failure part way leaves the previous image intact.
    fn replace_all(&self, vehicles: &[Vehicle]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;

        let tmp_path = Self::sibling(&self.path, ".tmp");
        Self::write_header(&tmp_path)?;
        {
            let mut tmp = BufWriter::new(OpenOptions::new().append(true).open(&tmp_path)?);
            for vehicle in vehicles {
                if let Err(e) = Self::write_entry(&mut tmp, vehicle) {
                    drop(tmp);
                    let _ = fs::remove_file(&tmp_path);
                    return Err(e);
                }
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        *writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);

        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}
