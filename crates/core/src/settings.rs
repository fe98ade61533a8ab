use glam::Vec4;
use log::debug;

/// Options recognised by the engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Name of the requested GPU API, resolved by the platform adapter.
    RenderApi,
    /// Upper-left window corner.
    WinX,
    WinY,
    WinWidth,
    WinHeight,
    FullScreen,
    WindowsTitle,
    /// Colour depth in bits per pixel.
    Bpp,
    DepthBufferDepth,
    StencilBufferDepth,
    ClearColor,
    /// True when the platform loop should poll instead of waiting.
    PollingMode,
    DefaultFont,
    /// 2D or 3D default pipeline selection.
    RenderMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Int(i32),
    Float(f32),
    Bool(bool),
    Text(String),
    Color(Vec4),
}

impl ConfigValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Vec4> {
        match self {
            ConfigValue::Color(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Render2D,
    Render3D,
}

/// Typed configuration store with a default for every recognised option.
///
/// `apply` accepts loosely typed name/value pairs from the outside world,
/// ignoring unknown names, so a settings file may carry options this build
/// does not know about.
#[derive(Debug, Clone)]
pub struct Settings {
    entries: foldhash::HashMap<ConfigKey, ConfigValue>,
}

impl Settings {
    pub fn new() -> Self {
        let mut entries = foldhash::HashMap::default();

        entries.insert(
            ConfigKey::RenderApi,
            ConfigValue::Text("opengl".to_string()),
        );
        entries.insert(ConfigKey::WinX, ConfigValue::Int(0));
        entries.insert(ConfigKey::WinY, ConfigValue::Int(0));
        entries.insert(ConfigKey::WinWidth, ConfigValue::Int(1024));
        entries.insert(ConfigKey::WinHeight, ConfigValue::Int(768));
        entries.insert(ConfigKey::FullScreen, ConfigValue::Bool(false));
        entries.insert(
            ConfigKey::WindowsTitle,
            ConfigValue::Text("dusk".to_string()),
        );
        entries.insert(ConfigKey::Bpp, ConfigValue::Int(32));
        entries.insert(ConfigKey::DepthBufferDepth, ConfigValue::Int(24));
        entries.insert(ConfigKey::StencilBufferDepth, ConfigValue::Int(8));
        entries.insert(
            ConfigKey::ClearColor,
            ConfigValue::Color(Vec4::new(0.0, 0.0, 0.0, 1.0)),
        );
        entries.insert(ConfigKey::PollingMode, ConfigValue::Bool(false));
        entries.insert(
            ConfigKey::DefaultFont,
            ConfigValue::Text("default".to_string()),
        );
        entries.insert(ConfigKey::RenderMode, ConfigValue::Int(3));

        Settings { entries }
    }

    pub fn get(&self, key: ConfigKey) -> &ConfigValue {
        // Every key has a default, so the lookup cannot miss.
        &self.entries[&key]
    }

    pub fn set(&mut self, key: ConfigKey, value: ConfigValue) {
        self.entries.insert(key, value);
    }

    pub fn render_mode(&self) -> RenderMode {
        match self.get(ConfigKey::RenderMode).as_int() {
            Some(2) => RenderMode::Render2D,
            _ => RenderMode::Render3D,
        }
    }

    /// Applies one loosely typed option. Unknown names are ignored; values
    /// that fail to parse leave the previous setting untouched.
    pub fn apply(&mut self, name: &str, value: &str) {
        let Some(key) = key_by_name(name) else {
            debug!("Ignoring unknown option {name}");
            return;
        };

        let parsed = match self.get(key) {
            ConfigValue::Int(_) => value.parse::<i32>().ok().map(ConfigValue::Int),
            ConfigValue::Float(_) => value.parse::<f32>().ok().map(ConfigValue::Float),
            ConfigValue::Bool(_) => value.parse::<bool>().ok().map(ConfigValue::Bool),
            ConfigValue::Text(_) => Some(ConfigValue::Text(value.to_string())),
            ConfigValue::Color(_) => parse_color(value).map(ConfigValue::Color),
        };

        match parsed {
            Some(parsed) => {
                self.entries.insert(key, parsed);
            }
            None => debug!("Ignoring malformed value {value:?} for option {name}"),
        }
    }

    /// Applies a batch of name/value pairs.
    pub fn apply_all<'a>(&mut self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (name, value) in pairs {
            self.apply(name, value);
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::new()
    }
}

fn key_by_name(name: &str) -> Option<ConfigKey> {
    Some(match name {
        "RenderAPI" => ConfigKey::RenderApi,
        "WinX" => ConfigKey::WinX,
        "WinY" => ConfigKey::WinY,
        "WinWidth" => ConfigKey::WinWidth,
        "WinHeight" => ConfigKey::WinHeight,
        "FullScreen" => ConfigKey::FullScreen,
        "WindowsTitle" => ConfigKey::WindowsTitle,
        "BPP" => ConfigKey::Bpp,
        "DepthBufferDepth" => ConfigKey::DepthBufferDepth,
        "StencilBufferDepth" => ConfigKey::StencilBufferDepth,
        "ClearColor" => ConfigKey::ClearColor,
        "PollingMode" => ConfigKey::PollingMode,
        "DefaultFont" => ConfigKey::DefaultFont,
        "RenderMode" => ConfigKey::RenderMode,
        _ => return None,
    })
}

fn parse_color(value: &str) -> Option<Vec4> {
    let mut parts = value.split(',').map(|p| p.trim().parse::<f32>());
    let r = parts.next()?.ok()?;
    let g = parts.next()?.ok()?;
    let b = parts.next()?.ok()?;
    let a = match parts.next() {
        Some(part) => part.ok()?,
        None => 1.0,
    };
    Some(Vec4::new(r, g, b, a))
}
