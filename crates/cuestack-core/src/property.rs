//! Versioned cue properties.
//!
//! Every configurable value on a cue is a [`Property`] with three slots:
//!
//! - **defined** - what the designer asked for; edited by the UI, OSC and show loading
//! - **live** - what is currently driving playback; copied from defined when a cue starts
//! - **target** - reserved, always present
//!
//! A change callback fires only when a slot's value actually changes, which keeps
//! the UI and model from ping-ponging edits back and forth. Callbacks can be
//! paused and resumed; the pause call returns the previous state so callers nest.

use std::collections::HashMap;
use std::fmt;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde_json::Value;
use thiserror::Error;

/// Which of the three value slots of a property to address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyVersion {
    Defined,
    Live,
    Target,
}

impl PropertyVersion {
    /// All versions, in slot order.
    pub const ALL: [PropertyVersion; 3] = [Self::Defined, Self::Live, Self::Target];

    #[inline]
    fn index(self) -> usize {
        match self {
            Self::Defined => 0,
            Self::Live => 1,
            Self::Target => 2,
        }
    }
}

/// The storage type of a property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyType {
    Bool,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    String,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Double => "double",
            Self::String => "string",
        };
        f.write_str(name)
    }
}

/// A dynamically typed property value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
}

/// JSON spelling of negative infinity in show documents.
pub const NEG_INFINITE_JSON: &str = "-Infinite";

impl PropertyValue {
    /// The type tag of this value.
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::Bool(_) => PropertyType::Bool,
            Self::Int32(_) => PropertyType::Int32,
            Self::UInt32(_) => PropertyType::UInt32,
            Self::Int64(_) => PropertyType::Int64,
            Self::UInt64(_) => PropertyType::UInt64,
            Self::Double(_) => PropertyType::Double,
            Self::String(_) => PropertyType::String,
        }
    }

    /// The zero value of a type.
    pub fn default_for(ty: PropertyType) -> Self {
        match ty {
            PropertyType::Bool => Self::Bool(false),
            PropertyType::Int32 => Self::Int32(0),
            PropertyType::UInt32 => Self::UInt32(0),
            PropertyType::Int64 => Self::Int64(0),
            PropertyType::UInt64 => Self::UInt64(0),
            PropertyType::Double => Self::Double(0.0),
            PropertyType::String => Self::String(String::new()),
        }
    }

    /// Serialize to the JSON shape used by show documents.
    ///
    /// Non-finite doubles have no JSON number representation; negative
    /// infinity is written as the string `"-Infinite"`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(v) => Value::from(*v),
            Self::Int32(v) => Value::from(*v),
            Self::UInt32(v) => Value::from(*v),
            Self::Int64(v) => Value::from(*v),
            Self::UInt64(v) => Value::from(*v),
            Self::Double(v) if v.is_infinite() && v.is_sign_negative() => {
                Value::from(NEG_INFINITE_JSON)
            }
            Self::Double(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::String(v) => Value::from(v.as_str()),
        }
    }

    /// Parse a JSON value as the given type. Returns None on a type mismatch.
    pub fn from_json(ty: PropertyType, value: &Value) -> Option<Self> {
        match ty {
            PropertyType::Bool => value.as_bool().map(Self::Bool),
            PropertyType::Int32 => value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Self::Int32),
            PropertyType::UInt32 => value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Self::UInt32),
            PropertyType::Int64 => value.as_i64().map(Self::Int64),
            PropertyType::UInt64 => value.as_u64().map(Self::UInt64),
            PropertyType::Double => match value {
                Value::String(s) if s == NEG_INFINITE_JSON => Some(Self::Double(f64::NEG_INFINITY)),
                _ => value.as_f64().map(Self::Double),
            },
            PropertyType::String => value.as_str().map(|s| Self::String(s.to_string())),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt64(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// Conversion between Rust scalars and [`PropertyValue`].
pub trait PropertyScalar: Sized {
    const TYPE: PropertyType;
    fn into_value(self) -> PropertyValue;
    fn from_value(value: &PropertyValue) -> Option<Self>;
}

macro_rules! impl_scalar {
    ($ty:ty, $variant:ident) => {
        impl PropertyScalar for $ty {
            const TYPE: PropertyType = PropertyType::$variant;

            fn into_value(self) -> PropertyValue {
                PropertyValue::$variant(self)
            }

            fn from_value(value: &PropertyValue) -> Option<Self> {
                match value {
                    PropertyValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_scalar!(bool, Bool);
impl_scalar!(i32, Int32);
impl_scalar!(u32, UInt32);
impl_scalar!(i64, Int64);
impl_scalar!(u64, UInt64);
impl_scalar!(f64, Double);
impl_scalar!(String, String);

/// Errors from reading properties.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropertyError {
    #[error("property '{0}' not found")]
    NotFound(String),

    #[error("property '{name}' is {actual}, not {requested}")]
    WrongType {
        name: String,
        actual: PropertyType,
        requested: PropertyType,
    },

    #[error("property '{0}' is not nullable")]
    NotNullable(String),
}

/// Notification that one slot of a property changed value.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyChange {
    pub property: String,
    pub version: PropertyVersion,
}

/// Validator: receives the proposed value and returns the value to store.
pub type Validator = Box<dyn Fn(PropertyVersion, PropertyValue) -> PropertyValue + Send>;

/// Change callback, fired after a slot actually changed.
pub type ChangeCallback = Box<dyn Fn(&PropertyChange) + Send>;

/// A named, typed value with defined/live/target slots.
pub struct Property {
    name: String,
    class: &'static str,
    ty: PropertyType,
    values: [PropertyValue; 3],
    nulls: [bool; 3],
    nullable: bool,
    validator: Option<Validator>,
    on_change: Option<ChangeCallback>,
    observers: Vec<Sender<PropertyChange>>,
    callbacks_paused: bool,
}

impl Property {
    /// Create a property with the same initial value in every slot.
    ///
    /// `class` names the cue class section the property is persisted under.
    pub fn new(name: impl Into<String>, class: &'static str, initial: PropertyValue) -> Self {
        let ty = initial.property_type();
        Self {
            name: name.into(),
            class,
            ty,
            values: [initial.clone(), initial.clone(), initial],
            nulls: [false; 3],
            nullable: false,
            validator: None,
            on_change: None,
            observers: Vec::new(),
            callbacks_paused: false,
        }
    }

    /// Make the property nullable, starting out null in every slot.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self.nulls = [true; 3];
        self
    }

    /// Attach a validator that may coerce values before they are stored.
    pub fn with_validator(
        mut self,
        validator: impl Fn(PropertyVersion, PropertyValue) -> PropertyValue + Send + 'static,
    ) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Attach a change callback.
    pub fn with_change_callback(mut self, callback: impl Fn(&PropertyChange) + Send + 'static) -> Self {
        self.on_change = Some(Box::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cue class section this property belongs to.
    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn property_type(&self) -> PropertyType {
        self.ty
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Read a slot.
    pub fn value(&self, version: PropertyVersion) -> &PropertyValue {
        &self.values[version.index()]
    }

    /// Read a slot as a Rust scalar.
    pub fn get<T: PropertyScalar>(&self, version: PropertyVersion) -> Result<T, PropertyError> {
        T::from_value(self.value(version)).ok_or_else(|| PropertyError::WrongType {
            name: self.name.clone(),
            actual: self.ty,
            requested: T::TYPE,
        })
    }

    /// Write a slot. Returns false (and stores nothing) on a type mismatch.
    ///
    /// Writing a value equal to the current one is a no-op and fires no callback.
    /// Writing a value clears the slot's null bit.
    pub fn set(&mut self, version: PropertyVersion, value: PropertyValue) -> bool {
        if value.property_type() != self.ty {
            log::error!(
                "Refusing to set {} property '{}' to a {} value",
                self.ty,
                self.name,
                value.property_type()
            );
            return false;
        }

        let value = match &self.validator {
            Some(validator) => validator(version, value),
            None => value,
        };
        if value.property_type() != self.ty {
            log::error!("Validator for '{}' returned a {} value", self.name, value.property_type());
            return false;
        }

        let idx = version.index();
        let was_null = self.nulls[idx];
        let changed = was_null || self.values[idx] != value;
        self.values[idx] = value;
        self.nulls[idx] = false;

        if changed {
            self.notify(version);
        }
        true
    }

    /// Write a slot from a Rust scalar.
    pub fn set_scalar<T: PropertyScalar>(&mut self, version: PropertyVersion, value: T) -> bool {
        self.set(version, value.into_value())
    }

    /// Set or clear the null bit of a slot.
    ///
    /// Only valid on nullable properties; otherwise logs and does nothing.
    pub fn set_null(&mut self, version: PropertyVersion, null: bool) -> bool {
        if !self.nullable {
            log::error!("set_null called on non-nullable property '{}'", self.name);
            return false;
        }
        let idx = version.index();
        if self.nulls[idx] != null {
            self.nulls[idx] = null;
            self.notify(version);
        }
        true
    }

    /// Whether a slot is null. Non-nullable properties are never null.
    pub fn is_null(&self, version: PropertyVersion) -> bool {
        if !self.nullable {
            log::error!("get_null called on non-nullable property '{}'", self.name);
            return false;
        }
        self.nulls[version.index()]
    }

    /// Copy the defined slot, including its null bit, into the live slot.
    pub fn copy_defined_to_live(&mut self) {
        let defined = PropertyVersion::Defined.index();
        let live = PropertyVersion::Live.index();
        let changed =
            self.nulls[defined] != self.nulls[live] || self.values[defined] != self.values[live];
        self.values[live] = self.values[defined].clone();
        self.nulls[live] = self.nulls[defined];
        if changed {
            self.notify(PropertyVersion::Live);
        }
    }

    /// Suppress change callbacks. Returns the previous pause state.
    pub fn pause_change_callback(&mut self) -> bool {
        std::mem::replace(&mut self.callbacks_paused, true)
    }

    /// Restore the pause state returned by [`Property::pause_change_callback`].
    pub fn resume_change_callback(&mut self, previous: bool) -> bool {
        std::mem::replace(&mut self.callbacks_paused, previous)
    }

    fn subscribe(&mut self, sender: Sender<PropertyChange>) {
        self.observers.push(sender);
    }

    fn notify(&mut self, version: PropertyVersion) {
        if self.callbacks_paused {
            return;
        }
        let change = PropertyChange {
            property: self.name.clone(),
            version,
        };
        if let Some(callback) = &self.on_change {
            callback(&change);
        }
        // Drop observers whose receiving end went away.
        self.observers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("values", &self.values)
            .field("nulls", &self.nulls)
            .finish_non_exhaustive()
    }
}

/// Named collection of properties owned by one cue.
#[derive(Debug, Default)]
pub struct PropertyStore {
    properties: HashMap<String, Property>,
    observers: Vec<Sender<PropertyChange>>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property. Returns false if the name is already taken.
    pub fn add(&mut self, mut property: Property) -> bool {
        if self.properties.contains_key(property.name()) {
            log::error!("Property '{}' already exists", property.name());
            return false;
        }
        for tx in &self.observers {
            property.subscribe(tx.clone());
        }
        self.properties.insert(property.name().to_string(), property);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// Read a property slot as a Rust scalar.
    pub fn get<T: PropertyScalar>(&self, name: &str, version: PropertyVersion) -> Result<T, PropertyError> {
        self.properties
            .get(name)
            .ok_or_else(|| PropertyError::NotFound(name.to_string()))?
            .get(version)
    }

    /// Read a property slot, falling back to a default on any error.
    pub fn get_or<T: PropertyScalar>(&self, name: &str, version: PropertyVersion, default: T) -> T {
        self.get(name, version).unwrap_or(default)
    }

    /// Read a property slot as a dynamically typed value.
    pub fn get_value(&self, name: &str, version: PropertyVersion) -> Result<&PropertyValue, PropertyError> {
        self.properties
            .get(name)
            .map(|p| p.value(version))
            .ok_or_else(|| PropertyError::NotFound(name.to_string()))
    }

    /// Write a property slot. Returns false if missing or of a different type.
    pub fn set<T: PropertyScalar>(&mut self, name: &str, version: PropertyVersion, value: T) -> bool {
        self.set_value(name, version, value.into_value())
    }

    /// Write a property slot from a dynamically typed value.
    pub fn set_value(&mut self, name: &str, version: PropertyVersion, value: PropertyValue) -> bool {
        match self.properties.get_mut(name) {
            Some(property) => property.set(version, value),
            None => {
                log::error!("Cannot set missing property '{}'", name);
                false
            }
        }
    }

    pub fn set_null(&mut self, name: &str, version: PropertyVersion, null: bool) -> bool {
        match self.properties.get_mut(name) {
            Some(property) => property.set_null(version, null),
            None => {
                log::error!("Cannot set null on missing property '{}'", name);
                false
            }
        }
    }

    /// Whether a nullable property slot is null.
    pub fn is_null(&self, name: &str, version: PropertyVersion) -> Result<bool, PropertyError> {
        let property = self
            .properties
            .get(name)
            .ok_or_else(|| PropertyError::NotFound(name.to_string()))?;
        if !property.is_nullable() {
            return Err(PropertyError::NotNullable(name.to_string()));
        }
        Ok(property.is_null(version))
    }

    /// Read a nullable slot, mapping null to None.
    pub fn get_nullable<T: PropertyScalar>(&self, name: &str, version: PropertyVersion) -> Option<T> {
        match self.is_null(name, version) {
            Ok(false) => self.get(name, version).ok(),
            _ => None,
        }
    }

    /// Copy defined to live for one property.
    pub fn copy_defined_to_live(&mut self, name: &str) -> bool {
        match self.properties.get_mut(name) {
            Some(property) => {
                property.copy_defined_to_live();
                true
            }
            None => {
                log::error!("Cannot copy missing property '{}' to live", name);
                false
            }
        }
    }

    /// Copy defined to live for every property in `names`.
    pub fn copy_to_live(&mut self, names: &[&str]) {
        for name in names {
            self.copy_defined_to_live(name);
        }
    }

    /// Pause the change callback of one property, returning its previous pause state.
    pub fn pause_change_callback(&mut self, name: &str) -> Option<bool> {
        self.properties.get_mut(name).map(Property::pause_change_callback)
    }

    /// Restore a pause state returned by [`PropertyStore::pause_change_callback`].
    pub fn resume_change_callback(&mut self, name: &str, previous: bool) -> Option<bool> {
        self.properties
            .get_mut(name)
            .map(|p| p.resume_change_callback(previous))
    }

    /// Receive a notification for every change in this store, including
    /// properties added later.
    pub fn subscribe(&mut self) -> Receiver<PropertyChange> {
        let (tx, rx) = unbounded();
        for property in self.properties.values_mut() {
            property.subscribe(tx.clone());
        }
        self.observers.push(tx);
        rx
    }

    /// Serialize the defined slot of every property in a class section.
    ///
    /// Null slots of nullable properties are written as JSON `null`.
    pub fn section_to_json(&self, class: &str) -> serde_json::Map<String, Value> {
        let mut section = serde_json::Map::new();
        for property in self.properties.values().filter(|p| p.class() == class) {
            let value = if property.is_nullable() && property.is_null(PropertyVersion::Defined) {
                Value::Null
            } else {
                property.value(PropertyVersion::Defined).to_json()
            };
            section.insert(property.name().to_string(), value);
        }
        section
    }

    /// Apply a class section to the defined slots.
    ///
    /// Unknown keys and values of the wrong type are logged and skipped.
    pub fn apply_json_section(&mut self, class: &str, section: &serde_json::Map<String, Value>) {
        for (key, value) in section {
            let Some(property) = self.properties.get_mut(key) else {
                log::debug!("Ignoring unknown {} property '{}'", class, key);
                continue;
            };
            if value.is_null() {
                if property.is_nullable() {
                    property.set_null(PropertyVersion::Defined, true);
                } else {
                    log::warn!("Property '{}' is not nullable, ignoring null", key);
                }
                continue;
            }
            match PropertyValue::from_json(property.property_type(), value) {
                Some(parsed) => {
                    property.set(PropertyVersion::Defined, parsed);
                }
                None => log::warn!(
                    "Property '{}' expects {}, got {}; keeping {}",
                    key,
                    property.property_type(),
                    value,
                    property.value(PropertyVersion::Defined)
                ),
            }
        }
    }
}

/// Decibel floor below which a level is treated as silence.
pub const DB_FLOOR: f64 = -49.99;

/// Validator for decibel properties: anything below [`DB_FLOOR`] becomes negative infinity.
pub fn decibel_validator(_version: PropertyVersion, value: PropertyValue) -> PropertyValue {
    match value {
        PropertyValue::Double(db) if db < DB_FLOOR => PropertyValue::Double(f64::NEG_INFINITY),
        other => other,
    }
}

/// Convert decibels to a linear gain (negative infinity is silence).
pub fn db_to_linear(db: f64) -> f64 {
    if db == f64::NEG_INFINITY {
        0.0
    } else {
        10f64.powf(db / 20.0)
    }
}

/// Convert a linear gain to decibels (zero is negative infinity).
pub fn linear_to_db(linear: f64) -> f64 {
    20.0 * linear.log10()
}
