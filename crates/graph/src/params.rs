use core::fmt;
use core::mem;

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use pod::Value;
use protocol::flags::ParamFlags;
use protocol::id::Param;

/// A collection of parameters on a node or port.
///
/// Every parameter id maps to an ordered list of values; enumeration walks
/// the list by index so it is restartable.
pub struct Parameters {
    values: BTreeMap<Param, Vec<Value>>,
    flags: BTreeMap<Param, ParamFlags>,
    modified: bool,
}

impl Parameters {
    /// Construct a new collection of parameters.
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            flags: BTreeMap::new(),
            modified: false,
        }
    }

    /// Take the modified state of the parameters.
    pub fn take_modified(&mut self) -> bool {
        mem::take(&mut self.modified)
    }

    /// Mark that a parameter can be read.
    pub fn set_read(&mut self, id: Param) {
        self.set_flag(id, ParamFlags::READ);
    }

    /// Mark that a parameter can be written.
    pub fn set_write(&mut self, id: Param) {
        self.set_flag(id, ParamFlags::WRITE);
    }

    /// Set a parameter to the given values, replacing previous ones.
    pub fn set_param(&mut self, id: Param, values: Vec<Value>) {
        self.values.insert(id, values);
        self.set_flag(id, ParamFlags::READ);
        self.modified = true;
    }

    /// Append a value to a parameter.
    pub fn push_param(&mut self, id: Param, value: Value) {
        self.values.entry(id).or_default().push(value);
        self.set_flag(id, ParamFlags::READ);
        self.modified = true;
    }

    /// Remove a parameter, returning its previous values.
    pub fn remove_param(&mut self, id: Param) -> Option<Vec<Value>> {
        let values = self.values.remove(&id)?;
        self.modified = true;
        Some(values)
    }

    /// Get the values of a parameter.
    pub fn get_param(&self, id: Param) -> &[Value] {
        self.values.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// The declared parameter kinds and their read/write flags.
    pub fn param_flags(&self) -> &BTreeMap<Param, ParamFlags> {
        &self.flags
    }

    fn set_flag(&mut self, id: Param, flag: ParamFlags) {
        match self.flags.entry(id) {
            Entry::Vacant(e) => {
                e.insert(flag);
            }
            Entry::Occupied(e) => {
                if e.get().contains(flag) {
                    return;
                }

                *e.into_mut() |= flag;
            }
        }

        self.modified = true;
    }
}

impl fmt::Debug for Parameters {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameters")
            .field("values", &self.values.keys())
            .field("flags", &self.flags)
            .field("modified", &self.modified)
            .finish()
    }
}

impl Default for Parameters {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
