//! Serialization of [`Settings`] into a fixed-size block, and the [`Storage`] boundary the block is kept behind.
//!
//! The block starts with [`SERIALIZATION_ID`]. Any change to the layout below must change the ID, so that firmware
//! never interprets a block written by a different layout; a mismatch resets every setting to its default.

use super::{ArpMode, ArpSettings, ClockMode, KeyboardConfig, MAX_PPQN, MAX_ROWS};
use crate::{
    chord::{ChordExtension, Scale},
    output::Ports,
    velocity::VelocityCurve,
    zone::{MAX_ZONES, Zone, ZonePreset},
};
use embassy_time::Duration;
use num_traits::{FromPrimitive, ToPrimitive};
use tinyvec::ArrayVec;
use wmidi::{Channel, Note, U7};

/// Identifies the layout of a settings block.
pub const SERIALIZATION_ID: [u8; 4] = *b"ORG1";

/// Size of a serialized [`Settings`] block in bytes.
pub const SETTINGS_BLOCK_LEN: usize = 64;

/// Opaque identifier of a persisted block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockId(pub u8);

/// The block [`Settings`] are kept in.
pub const SETTINGS_BLOCK: BlockId = BlockId(0);

const UNLEARNED: u8 = 0xFF;

/// Persistent block storage, e.g. a flash sector or an EEPROM.
pub trait Storage {
    /// Failure reported by the medium.
    type Error;

    /// Fills `buf` with the start of `block`.
    fn read(&mut self, block: BlockId, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Replaces the contents of `block` with `data`.
    fn write(&mut self, block: BlockId, data: &[u8]) -> Result<(), Self::Error>;
}

/// Reasons settings couldn't be loaded or stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SettingsError {
    /// The storage medium reported an error.
    Storage,
    /// The block was written with a different layout, or never written at all.
    SerializationMismatch,
    /// The block carries the right ID but values that are out of range.
    Malformed,
}

/// Every persisted setting.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    /// Scanner geometry and velocity measurement.
    pub keyboard: KeyboardConfig,
    /// Keyboard splits.
    pub zones: ZonePreset,
    /// Arpeggiator and clock.
    pub arp: ArpSettings,
}

impl Settings {
    /// Reads settings from `storage`.
    pub fn load<S: Storage>(storage: &mut S) -> Result<Self, SettingsError> {
        let mut block = [0; SETTINGS_BLOCK_LEN];
        storage
            .read(SETTINGS_BLOCK, &mut block)
            .map_err(|_| SettingsError::Storage)?;
        Self::from_bytes(&block)
    }

    /// Reads settings from `storage`, falling back to (and immediately persisting) defaults if the stored block is
    /// missing, stale or malformed.
    pub fn load_or_default<S: Storage>(storage: &mut S) -> Self {
        match Self::load(storage) {
            Ok(settings) => settings,
            Err(SettingsError::Storage) => {
                warn!("Settings storage unreadable, using defaults");
                Self::default()
            }
            Err(e) => {
                info!("No usable settings ({}), restoring defaults", e);
                let settings = Self::default();
                if settings.persist(storage).is_err() {
                    warn!("Failed to persist default settings");
                }
                settings
            }
        }
    }

    /// Writes settings to `storage`.
    pub fn persist<S: Storage>(&self, storage: &mut S) -> Result<(), SettingsError> {
        storage
            .write(SETTINGS_BLOCK, &self.to_bytes())
            .map_err(|_| SettingsError::Storage)
    }

    /// Serializes into a block.
    pub fn to_bytes(&self) -> [u8; SETTINGS_BLOCK_LEN] {
        let mut block = [0; SETTINGS_BLOCK_LEN];
        let mut w = Writer { buf: &mut block, pos: 0 };
        w.bytes(&SERIALIZATION_ID);
        write_keyboard(&mut w, &self.keyboard);
        write_zones(&mut w, &self.zones);
        write_arp(&mut w, &self.arp);
        block
    }

    /// Deserializes a block produced by [`Settings::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SettingsError> {
        if bytes.get(..SERIALIZATION_ID.len()) != Some(&SERIALIZATION_ID[..]) {
            return Err(SettingsError::SerializationMismatch);
        }
        let mut r = Reader {
            buf: bytes,
            pos: SERIALIZATION_ID.len(),
        };
        Ok(Self {
            keyboard: read_keyboard(&mut r)?,
            zones: read_zones(&mut r)?,
            arp: read_arp(&mut r)?,
        })
    }
}

fn write_keyboard(w: &mut Writer, config: &KeyboardConfig) {
    w.u8(config.num_rows);
    let flags = u8::from(config.invert_inputs)
        | u8::from(config.single_contact) << 1
        | u8::from(config.release_velocity) << 2;
    w.u8(flags);
    w.u8(config.fixed_velocity);
    w.u8(config.note_offset);
    for delay in [
        config.delay_fastest,
        config.delay_fastest_black_keys,
        config.delay_slowest,
        config.delay_fastest_release,
        config.delay_slowest_release,
    ] {
        w.u32(u32::try_from(delay.as_micros()).unwrap_or(u32::MAX));
    }
    w.u8(config.curve.to_u8().unwrap_or(0));
}

fn read_keyboard(r: &mut Reader) -> Result<KeyboardConfig, SettingsError> {
    let num_rows = r.u8()?;
    if usize::from(num_rows) > MAX_ROWS {
        return Err(SettingsError::Malformed);
    }
    let flags = r.u8()?;
    let fixed_velocity = r.u8()?;
    let note_offset = r.u8()?;
    if fixed_velocity > 127 || note_offset > 127 {
        return Err(SettingsError::Malformed);
    }
    Ok(KeyboardConfig {
        num_rows,
        invert_inputs: flags & 0b001 != 0,
        single_contact: flags & 0b010 != 0,
        release_velocity: flags & 0b100 != 0,
        fixed_velocity,
        note_offset,
        delay_fastest: r.duration()?,
        delay_fastest_black_keys: r.duration()?,
        delay_slowest: r.duration()?,
        delay_fastest_release: r.duration()?,
        delay_slowest_release: r.duration()?,
        curve: r.variant::<VelocityCurve>()?,
    })
}

fn write_zones(w: &mut Writer, preset: &ZonePreset) {
    let zones = preset.zones();
    w.u8(zones.len() as u8);
    for index in 0..MAX_ZONES {
        match zones.get(index) {
            Some(zone) => {
                w.u8(zone.start.map_or(UNLEARNED, |note| note as u8));
                w.u8(zone.transpose as u8);
                w.u8(zone.channel.index());
                w.u16(zone.ports.to_raw());
            }
            None => w.bytes(&[0; 5]),
        }
    }
}

fn read_zones(r: &mut Reader) -> Result<ZonePreset, SettingsError> {
    let count = usize::from(r.u8()?);
    let mut zones = ArrayVec::<[Zone; MAX_ZONES]>::new();
    for index in 0..MAX_ZONES {
        let start = match r.u8()? {
            UNLEARNED => None,
            note @ 0..=127 => Some(Note::from(U7::from_u8_lossy(note))),
            _ => return Err(SettingsError::Malformed),
        };
        let transpose = r.u8()? as i8;
        let channel = Channel::from_index(r.u8()?).map_err(|_| SettingsError::Malformed)?;
        let ports = Ports::from_raw(r.u16()?);
        if index < count {
            zones.push(Zone {
                start,
                transpose,
                channel,
                ports,
            });
        }
    }
    if count > MAX_ZONES {
        return Err(SettingsError::Malformed);
    }
    ZonePreset::from_zones(zones).ok_or(SettingsError::Malformed)
}

fn write_arp(w: &mut Writer, arp: &ArpSettings) {
    w.u8(u8::from(arp.enabled));
    w.u8(arp.mode.to_u8().unwrap_or(0));
    w.u8(arp.pattern);
    w.u8(arp.root_key);
    w.u8(arp.scale.to_u8().unwrap_or(0));
    w.u8(arp.extension.to_u8().unwrap_or(0));
    w.u8(arp.clock_mode.to_u8().unwrap_or(0));
    w.u16(arp.bpm);
    w.u16(arp.ppqn);
    w.u8(arp.channel.map_or(0, |channel| channel.number()));
}

fn read_arp(r: &mut Reader) -> Result<ArpSettings, SettingsError> {
    let settings = ArpSettings {
        enabled: r.bool()?,
        mode: r.variant::<ArpMode>()?,
        pattern: r.u8()?,
        root_key: r.u8()?,
        scale: r.variant::<Scale>()?,
        extension: r.variant::<ChordExtension>()?,
        clock_mode: r.variant::<ClockMode>()?,
        bpm: r.u16()?,
        ppqn: r.u16()?,
        channel: match r.u8()? {
            0 => None,
            number => Some(Channel::from_index(number - 1).map_err(|_| SettingsError::Malformed)?),
        },
    };
    let valid = crate::arp::pattern(usize::from(settings.pattern)).is_some()
        && settings.root_key < 12
        && settings.bpm > 0
        && (1..=MAX_PPQN).contains(&settings.ppqn);
    if valid { Ok(settings) } else { Err(SettingsError::Malformed) }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.u8(byte);
        }
    }

    fn u8(&mut self, value: u8) {
        if let Some(slot) = self.buf.get_mut(self.pos) {
            *slot = value;
        }
        self.pos += 1;
    }

    fn u16(&mut self, value: u16) {
        self.bytes(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.bytes(&value.to_le_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn array<const N: usize>(&mut self) -> Result<[u8; N], SettingsError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + N)
            .ok_or(SettingsError::Malformed)?;
        self.pos += N;
        let mut array = [0; N];
        array.copy_from_slice(bytes);
        Ok(array)
    }

    fn u8(&mut self) -> Result<u8, SettingsError> {
        self.array::<1>().map(|[byte]| byte)
    }

    fn u16(&mut self) -> Result<u16, SettingsError> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, SettingsError> {
        self.array().map(u32::from_le_bytes)
    }

    fn bool(&mut self) -> Result<bool, SettingsError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SettingsError::Malformed),
        }
    }

    fn duration(&mut self) -> Result<Duration, SettingsError> {
        self.u32().map(|micros| Duration::from_micros(u64::from(micros)))
    }

    fn variant<T: FromPrimitive>(&mut self) -> Result<T, SettingsError> {
        T::from_u8(self.u8()?).ok_or(SettingsError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MemoryStorage {
        block: Option<[u8; SETTINGS_BLOCK_LEN]>,
        writes: usize,
        broken: bool,
    }

    impl Storage for MemoryStorage {
        type Error = ();

        fn read(&mut self, _block: BlockId, buf: &mut [u8]) -> Result<(), ()> {
            if self.broken {
                return Err(());
            }
            let block = self.block.unwrap_or([0xFF; SETTINGS_BLOCK_LEN]);
            buf.copy_from_slice(&block[..buf.len()]);
            Ok(())
        }

        fn write(&mut self, _block: BlockId, data: &[u8]) -> Result<(), ()> {
            if self.broken {
                return Err(());
            }
            let mut block = [0; SETTINGS_BLOCK_LEN];
            block[..data.len()].copy_from_slice(data);
            self.block = Some(block);
            self.writes += 1;
            Ok(())
        }
    }

    fn custom() -> Settings {
        let zones = [
            Zone::new(Note::CMinus1, 12, Channel::Ch1, Ports::Usb1),
            Zone::new(Note::C4, -24, Channel::Ch10, Ports::Uart1 | Ports::Osc2),
        ];
        Settings {
            keyboard: KeyboardConfig {
                release_velocity: true,
                delay_fastest_black_keys: Duration::from_micros(1_700),
                curve: VelocityCurve::BassBoost,
                ..KeyboardConfig::pedalboard()
            },
            zones: ZonePreset::split(&zones).expect("valid split"),
            arp: ArpSettings {
                enabled: true,
                mode: ArpMode::MultiKey,
                pattern: 3,
                root_key: 9,
                scale: Scale::Aeolian,
                extension: ChordExtension::Seventh,
                clock_mode: ClockMode::Slave,
                bpm: 93,
                ppqn: 48,
                channel: Some(Channel::Ch16),
            },
        }
    }

    #[test]
    fn block_round_trip() {
        let settings = custom();
        let block = settings.to_bytes();
        assert_eq!(SERIALIZATION_ID, block[..4], "Expected left but got right");
        assert_eq!(Ok(settings), Settings::from_bytes(&block), "Expected left but got right");
    }

    #[test]
    fn learning_preset_survives() {
        let mut settings = Settings::default();
        settings.zones.begin_learn(2);
        let restored = Settings::from_bytes(&settings.to_bytes()).expect("valid block");
        assert!(restored.zones.is_learning());
    }

    #[test]
    fn mismatched_id() {
        let mut block = custom().to_bytes();
        block[0] = b'X';
        assert_eq!(Err(SettingsError::SerializationMismatch), Settings::from_bytes(&block));
        assert_eq!(Err(SettingsError::SerializationMismatch), Settings::from_bytes(&[]));
    }

    #[test]
    fn malformed_values() {
        let mut block = Settings::default().to_bytes();
        // velocity curve id
        block[28] = 42;
        assert_eq!(Err(SettingsError::Malformed), Settings::from_bytes(&block));

        let mut block = Settings::default().to_bytes();
        // zone count
        block[29] = 0;
        assert_eq!(Err(SettingsError::Malformed), Settings::from_bytes(&block));

        assert_eq!(Err(SettingsError::Malformed), Settings::from_bytes(&SERIALIZATION_ID));
    }

    #[test]
    fn resolution_out_of_range() {
        let mut settings = custom();
        settings.arp.ppqn = MAX_PPQN + 1;
        assert_eq!(Err(SettingsError::Malformed), Settings::from_bytes(&settings.to_bytes()));

        settings.arp.ppqn = MAX_PPQN;
        let block = settings.to_bytes();
        assert_eq!(Ok(settings), Settings::from_bytes(&block));
    }

    #[test]
    fn load_or_default_restores_and_persists() {
        let mut storage = MemoryStorage::default();
        let settings = Settings::load_or_default(&mut storage);
        assert_eq!(Settings::default(), settings, "Expected left but got right");
        assert_eq!(1, storage.writes, "Defaults should be persisted immediately");
        assert_eq!(Ok(settings), Settings::load(&mut storage));
    }

    #[test]
    fn load_or_default_keeps_stored_settings() {
        let mut storage = MemoryStorage::default();
        custom().persist(&mut storage).expect("writable storage");
        assert_eq!(custom(), Settings::load_or_default(&mut storage));
        assert_eq!(1, storage.writes, "Valid settings shouldn't be rewritten");
    }

    #[test]
    fn broken_storage() {
        let mut storage = MemoryStorage {
            broken: true,
            ..MemoryStorage::default()
        };
        assert_eq!(Err(SettingsError::Storage), Settings::load(&mut storage));
        assert_eq!(Settings::default(), Settings::load_or_default(&mut storage));
        assert_eq!(0, storage.writes);
    }
}
