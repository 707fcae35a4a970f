use std::fmt;

/// Largest number of analog inputs on any supported device.
pub const MAX_CHANNELS: usize = 4;

/// Index of an analog input, displayed as its front-panel letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(usize);

impl ChannelId {
    pub const A: Self = Self(0);
    pub const B: Self = Self(1);
    pub const C: Self = Self(2);
    pub const D: Self = Self(3);

    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    pub fn letter(self) -> char {
        u32::try_from(self.0)
            .ok()
            .and_then(|offset| char::from_u32(u32::from('A') + offset))
            .unwrap_or('?')
    }

    /// Channels A+B and C+D share an ADC pair.
    pub const fn half(self) -> usize {
        self.0 / 2
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coupling {
    Ac,
    #[default]
    Dc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoltageRange {
    Mv50,
    Mv100,
    Mv200,
    Mv500,
    V1,
    V2,
    #[default]
    V5,
    V10,
    V20,
}

impl VoltageRange {
    pub fn millivolts(&self) -> u32 {
        match self {
            VoltageRange::Mv50 => 50,
            VoltageRange::Mv100 => 100,
            VoltageRange::Mv200 => 200,
            VoltageRange::Mv500 => 500,
            VoltageRange::V1 => 1_000,
            VoltageRange::V2 => 2_000,
            VoltageRange::V5 => 5_000,
            VoltageRange::V10 => 10_000,
            VoltageRange::V20 => 20_000,
        }
    }
}

/// Input settings forwarded to the device untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelConfig {
    pub coupling: Coupling,
    pub range: VoltageRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    id: ChannelId,
    enabled: bool,
    config: ChannelConfig,
}

impl Channel {
    /// Create a disabled channel with default input settings
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            enabled: false,
            config: ChannelConfig::default(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ChannelConfig) {
        self.config = config;
    }
}

/// Ids of the enabled channels, in index order.
pub fn enabled_ids(channels: &[Channel]) -> Vec<ChannelId> {
    channels
        .iter()
        .filter(|channel| channel.is_enabled())
        .map(Channel::id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_letters() {
        assert_eq!(ChannelId::A.letter(), 'A');
        assert_eq!(ChannelId::D.to_string(), "D");
        assert_eq!(ChannelId::new(2), ChannelId::C);
    }

    #[test]
    fn test_channel_halves() {
        assert_eq!(ChannelId::A.half(), ChannelId::B.half());
        assert_eq!(ChannelId::C.half(), ChannelId::D.half());
        assert_ne!(ChannelId::A.half(), ChannelId::C.half());
    }

    #[test]
    fn test_enable_disable() {
        let mut channel = Channel::new(ChannelId::B);
        assert!(!channel.is_enabled());
        channel.enable();
        assert!(channel.is_enabled());
        channel.disable();
        assert!(!channel.is_enabled());
    }

    #[test]
    fn test_enabled_ids() {
        let mut channels: Vec<Channel> = (0..MAX_CHANNELS)
            .map(|i| Channel::new(ChannelId::new(i)))
            .collect();
        channels[1].enable();
        channels[3].enable();
        assert_eq!(enabled_ids(&channels), vec![ChannelId::B, ChannelId::D]);
    }

    #[test]
    fn test_range_millivolts() {
        assert_eq!(VoltageRange::default().millivolts(), 5_000);
        assert_eq!(VoltageRange::Mv50.millivolts(), 50);
    }
}
