#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::Formatter;
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

pub const VID_RESPEAKER: u16 = 0x2886;
pub const PID_RESPEAKER: u16 = 0x0018;

/// How a parameter's value is carried on the wire.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ValueType {
    #[strum(to_string = "int")]
    Int,
    #[strum(to_string = "float")]
    Float,
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Access {
    #[strum(to_string = "ro")]
    ReadOnly,
    #[strum(to_string = "rw")]
    ReadWrite,
}

/// The device's address for a single parameter, plus what it accepts.
///
/// Identity is the `(group_id, offset)` pair, the bounds and access mode only matter when
/// validating a write.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterDescriptor {
    pub group_id: u16,
    pub offset: u8,
    pub value_type: ValueType,
    pub max: f64,
    pub min: f64,
    pub access: Access,
}

impl ParameterDescriptor {
    pub const fn new(
        group_id: u16,
        offset: u8,
        value_type: ValueType,
        max: f64,
        min: f64,
        access: Access,
    ) -> Self {
        Self {
            group_id,
            offset,
            value_type,
            max,
            min,
            access,
        }
    }

    pub fn id(&self) -> (u16, u8) {
        (self.group_id, self.offset)
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// True when `value` is within `[min, max]`. NaN is never in range.
    pub fn in_range(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

impl std::fmt::Display for ParameterDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} {} [{}..{}] {}",
            self.group_id, self.offset, self.value_type, self.min, self.max, self.access
        )
    }
}

/// Every tunable or readable value the firmware exposes, by its firmware name.
#[derive(
    Copy, Clone, Debug, Display, EnumIter, EnumCount, EnumString, IntoStaticStr, PartialEq, Eq, Hash,
)]
#[strum(ascii_case_insensitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Parameter {
    #[strum(serialize = "AECFREEZEONOFF")]
    AecFreezeOnOff,
    #[strum(serialize = "AECNORM")]
    AecNorm,
    #[strum(serialize = "AECPATHCHANGE")]
    AecPathChange,
    #[strum(serialize = "RT60")]
    Rt60,
    #[strum(serialize = "HPFONOFF")]
    HpfOnOff,
    #[strum(serialize = "RT60ONOFF")]
    Rt60OnOff,
    #[strum(serialize = "AECSILENCELEVEL")]
    AecSilenceLevel,
    #[strum(serialize = "AECSILENCEMODE")]
    AecSilenceMode,
    #[strum(serialize = "AGCONOFF")]
    AgcOnOff,
    #[strum(serialize = "AGCMAXGAIN")]
    AgcMaxGain,
    #[strum(serialize = "AGCDESIREDLEVEL")]
    AgcDesiredLevel,
    #[strum(serialize = "AGCGAIN")]
    AgcGain,
    #[strum(serialize = "AGCTIME")]
    AgcTime,
    #[strum(serialize = "CNIONOFF")]
    CniOnOff,
    #[strum(serialize = "FREEZEONOFF")]
    FreezeOnOff,
    #[strum(serialize = "STATNOISEONOFF")]
    StatNoiseOnOff,
    #[strum(serialize = "GAMMA_NS")]
    GammaNs,
    #[strum(serialize = "MIN_NS")]
    MinNs,
    #[strum(serialize = "NONSTATNOISEONOFF")]
    NonStatNoiseOnOff,
    #[strum(serialize = "GAMMA_NN")]
    GammaNn,
    #[strum(serialize = "MIN_NN")]
    MinNn,
    #[strum(serialize = "ECHOONOFF")]
    EchoOnOff,
    #[strum(serialize = "GAMMA_E")]
    GammaE,
    #[strum(serialize = "GAMMA_ETAIL")]
    GammaETail,
    #[strum(serialize = "GAMMA_ENL")]
    GammaEnl,
    #[strum(serialize = "NLATTENONOFF")]
    NlAttenOnOff,
    #[strum(serialize = "NLAEC_MODE")]
    NlAecMode,
    #[strum(serialize = "SPEECHDETECTED")]
    SpeechDetected,
    #[strum(serialize = "FSBUPDATED")]
    FsbUpdated,
    #[strum(serialize = "FSBPATHCHANGE")]
    FsbPathChange,
    #[strum(serialize = "TRANSIENTONOFF")]
    TransientOnOff,
    #[strum(serialize = "VOICEACTIVITY")]
    VoiceActivity,
    #[strum(serialize = "STATNOISEONOFF_SR")]
    StatNoiseOnOffSr,
    #[strum(serialize = "NONSTATNOISEONOFF_SR")]
    NonStatNoiseOnOffSr,
    #[strum(serialize = "GAMMA_NS_SR")]
    GammaNsSr,
    #[strum(serialize = "GAMMA_NN_SR")]
    GammaNnSr,
    #[strum(serialize = "MIN_NS_SR")]
    MinNsSr,
    #[strum(serialize = "MIN_NN_SR")]
    MinNnSr,
    #[strum(serialize = "GAMMAVAD_SR")]
    GammaVadSr,
    #[strum(serialize = "DOAANGLE")]
    DoaAngle,
}

impl Parameter {
    pub const fn descriptor(&self) -> ParameterDescriptor {
        use Access::{ReadOnly as RO, ReadWrite as RW};
        use ValueType::{Float, Int};

        match self {
            Parameter::AecFreezeOnOff => ParameterDescriptor::new(18, 7, Int, 1., 0., RW),
            Parameter::AecNorm => ParameterDescriptor::new(18, 19, Float, 16., 0.25, RW),
            Parameter::AecPathChange => ParameterDescriptor::new(18, 25, Int, 1., 0., RO),
            Parameter::Rt60 => ParameterDescriptor::new(18, 26, Float, 0.9, 0.25, RO),
            Parameter::HpfOnOff => ParameterDescriptor::new(18, 27, Int, 3., 0., RW),
            Parameter::Rt60OnOff => ParameterDescriptor::new(18, 28, Int, 1., 0., RW),
            Parameter::AecSilenceLevel => ParameterDescriptor::new(18, 30, Float, 1., 1e-9, RW),
            Parameter::AecSilenceMode => ParameterDescriptor::new(18, 31, Int, 1., 0., RO),
            Parameter::AgcOnOff => ParameterDescriptor::new(19, 0, Int, 1., 0., RW),
            Parameter::AgcMaxGain => ParameterDescriptor::new(19, 1, Float, 1000., 1., RW),
            Parameter::AgcDesiredLevel => ParameterDescriptor::new(19, 2, Float, 0.99, 1e-8, RW),
            Parameter::AgcGain => ParameterDescriptor::new(19, 3, Float, 1000., 1., RW),
            Parameter::AgcTime => ParameterDescriptor::new(19, 4, Float, 1., 0.1, RW),
            Parameter::CniOnOff => ParameterDescriptor::new(19, 5, Int, 1., 0., RW),
            Parameter::FreezeOnOff => ParameterDescriptor::new(19, 6, Int, 1., 0., RW),
            Parameter::StatNoiseOnOff => ParameterDescriptor::new(19, 8, Int, 1., 0., RW),
            Parameter::GammaNs => ParameterDescriptor::new(19, 9, Float, 3., 0., RW),
            Parameter::MinNs => ParameterDescriptor::new(19, 10, Float, 1., 0., RW),
            Parameter::NonStatNoiseOnOff => ParameterDescriptor::new(19, 11, Int, 1., 0., RW),
            Parameter::GammaNn => ParameterDescriptor::new(19, 12, Float, 3., 0., RW),
            Parameter::MinNn => ParameterDescriptor::new(19, 13, Float, 1., 0., RW),
            Parameter::EchoOnOff => ParameterDescriptor::new(19, 14, Int, 1., 0., RW),
            Parameter::GammaE => ParameterDescriptor::new(19, 15, Float, 3., 0., RW),
            Parameter::GammaETail => ParameterDescriptor::new(19, 16, Float, 3., 0., RW),
            Parameter::GammaEnl => ParameterDescriptor::new(19, 17, Float, 5., 0., RW),
            Parameter::NlAttenOnOff => ParameterDescriptor::new(19, 18, Int, 1., 0., RW),
            Parameter::NlAecMode => ParameterDescriptor::new(19, 20, Int, 2., 0., RW),
            Parameter::SpeechDetected => ParameterDescriptor::new(19, 22, Int, 1., 0., RO),
            Parameter::FsbUpdated => ParameterDescriptor::new(19, 23, Int, 1., 0., RO),
            Parameter::FsbPathChange => ParameterDescriptor::new(19, 24, Int, 1., 0., RO),
            Parameter::TransientOnOff => ParameterDescriptor::new(19, 29, Int, 1., 0., RW),
            Parameter::VoiceActivity => ParameterDescriptor::new(19, 32, Int, 1., 0., RO),
            Parameter::StatNoiseOnOffSr => ParameterDescriptor::new(19, 33, Int, 1., 0., RW),
            Parameter::NonStatNoiseOnOffSr => ParameterDescriptor::new(19, 34, Int, 1., 0., RW),
            Parameter::GammaNsSr => ParameterDescriptor::new(19, 35, Float, 3., 0., RW),
            Parameter::GammaNnSr => ParameterDescriptor::new(19, 36, Float, 3., 0., RW),
            Parameter::MinNsSr => ParameterDescriptor::new(19, 37, Float, 1., 0., RW),
            Parameter::MinNnSr => ParameterDescriptor::new(19, 38, Float, 1., 0., RW),
            Parameter::GammaVadSr => ParameterDescriptor::new(19, 39, Float, 1000., 0., RW),
            Parameter::DoaAngle => ParameterDescriptor::new(21, 0, Int, 359., 0., RO),
        }
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Which firmware a device is currently running, derived from how many interfaces its active
/// configuration exposes.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceMode {
    #[strum(to_string = "runtime")]
    Runtime,
    #[strum(to_string = "dfu")]
    Dfu,
}

impl DeviceMode {
    pub fn from_interface_count(count: u8) -> Self {
        match count {
            1 => DeviceMode::Dfu,
            _ => DeviceMode::Runtime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn table_has_every_parameter() {
        assert_eq!(Parameter::COUNT, 40);
        assert_eq!(Parameter::iter().count(), 40);
    }

    #[test]
    fn descriptor_ids_are_unique() {
        let ids: HashSet<(u16, u8)> = Parameter::iter().map(|p| p.descriptor().id()).collect();
        assert_eq!(ids.len(), Parameter::COUNT);
    }

    #[test]
    fn bounds_are_ordered() {
        for parameter in Parameter::iter() {
            let descriptor = parameter.descriptor();
            assert!(descriptor.min <= descriptor.max, "{parameter} has inverted bounds");
        }
    }

    #[test]
    fn offsets_fit_the_read_request() {
        // Offsets share wValue with the 0x80 / 0x40 read flags.
        for parameter in Parameter::iter() {
            assert!(parameter.descriptor().offset < 0x40, "{parameter}");
        }
    }

    #[test]
    fn names_round_trip() {
        for parameter in Parameter::iter() {
            assert_eq!(Parameter::from_str(parameter.name()).unwrap(), parameter);
        }
        assert_eq!(Parameter::from_str("doaangle").unwrap(), Parameter::DoaAngle);
        assert!(Parameter::from_str("NOPE").is_err());
    }

    #[test]
    fn known_entries() {
        let aec_norm = Parameter::AecNorm.descriptor();
        assert_eq!(aec_norm.id(), (18, 19));
        assert_eq!(aec_norm.value_type, ValueType::Float);
        assert_eq!((aec_norm.min, aec_norm.max), (0.25, 16.));
        assert!(aec_norm.is_writable());

        let doa = Parameter::DoaAngle.descriptor();
        assert_eq!(doa.id(), (21, 0));
        assert_eq!(doa.max, 359.);
        assert!(!doa.is_writable());

        assert_eq!(Parameter::AecSilenceLevel.descriptor().min, 1e-9);
        assert_eq!(Parameter::AgcDesiredLevel.descriptor().min, 1e-8);
    }

    #[test]
    fn range_check() {
        let hpf = Parameter::HpfOnOff.descriptor();
        assert!(hpf.in_range(0.));
        assert!(hpf.in_range(3.));
        assert!(!hpf.in_range(-1.));
        assert!(!hpf.in_range(4.));
        assert!(!hpf.in_range(f64::NAN));
    }

    #[test]
    fn mode_from_interfaces() {
        assert_eq!(DeviceMode::from_interface_count(1), DeviceMode::Dfu);
        assert_eq!(DeviceMode::from_interface_count(5), DeviceMode::Runtime);
    }
}
