use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::ProcessImage;
use crate::protocol::{
    error::{ModbusError, ModbusResult},
    transport::UnitFilter,
};

struct RegistryState {
    images: BTreeMap<u8, ProcessImage>,
    current: u8,
}

impl RegistryState {
    fn current_image(&mut self) -> ModbusResult<&mut ProcessImage> {
        let current = self.current;
        self.images
            .get_mut(&current)
            .ok_or(ModbusError::UnitNotFound(current))
    }
}

/// Process images for several unit ids behind one lock, with a current
/// selection that the plain accessors operate on.
///
/// `select_unit` followed by an accessor is two lock acquisitions; callers
/// sharing a registry across threads should use [`UnitRegistry::with_unit`],
/// which selects and accesses atomically.
pub struct UnitRegistry {
    state: Mutex<RegistryState>,
}

macro_rules! current_unit_accessors {
    ($($get:ident, $set:ident, $add:ident, $remove:ident, $range:ident, $count:ident => $ty:ty;)*) => {
        $(
            pub fn $get(&self, offset: usize) -> ModbusResult<$ty> {
                self.state.lock().current_image()?.$get(offset)
            }

            pub fn $set(&self, offset: usize, value: $ty) -> ModbusResult<()> {
                self.state.lock().current_image()?.$set(offset, value)
            }

            pub fn $add(&self, value: $ty) -> ModbusResult<()> {
                self.state.lock().current_image()?.$add(value);
                Ok(())
            }

            pub fn $remove(&self, offset: usize) -> ModbusResult<$ty> {
                self.state.lock().current_image()?.$remove(offset)
            }

            pub fn $range(&self, offset: usize, count: usize) -> ModbusResult<Vec<$ty>> {
                Ok(self.state.lock().current_image()?.$range(offset, count)?.to_vec())
            }

            pub fn $count(&self) -> ModbusResult<usize> {
                Ok(self.state.lock().current_image()?.$count())
            }
        )*
    };
}

impl UnitRegistry {
    /// One empty process image per unit id; the lowest id starts selected.
    pub fn new(unit_ids: impl IntoIterator<Item = u8>) -> ModbusResult<Self> {
        Self::with_images(unit_ids.into_iter().map(|id| (id, ProcessImage::new())))
    }

    pub fn with_images(images: impl IntoIterator<Item = (u8, ProcessImage)>) -> ModbusResult<Self> {
        let mut unique = BTreeMap::new();
        for (unit_id, image) in images {
            if unique.insert(unit_id, image).is_some() {
                return Err(ModbusError::Configuration(format!(
                    "unit {unit_id} is registered more than once"
                )));
            }
        }
        let images = unique;
        let current = *images.keys().next().ok_or(ModbusError::EmptyUnitSet)?;
        Ok(Self {
            state: Mutex::new(RegistryState { images, current }),
        })
    }

    /// Fails with `UnitNotFound` and keeps the previous selection when `unit_id`
    /// is not registered.
    pub fn select_unit(&self, unit_id: u8) -> ModbusResult<()> {
        let mut state = self.state.lock();
        if !state.images.contains_key(&unit_id) {
            return Err(ModbusError::UnitNotFound(unit_id));
        }
        state.current = unit_id;
        Ok(())
    }

    pub fn current_unit(&self) -> u8 {
        self.state.lock().current
    }

    pub fn unit_ids(&self) -> Vec<u8> {
        self.state.lock().images.keys().copied().collect()
    }

    pub fn contains_unit(&self, unit_id: u8) -> bool {
        self.state.lock().images.contains_key(&unit_id)
    }

    /// Selects `unit_id` and runs `f` on its image under a single lock.
    pub fn with_unit<R>(
        &self,
        unit_id: u8,
        f: impl FnOnce(&mut ProcessImage) -> R,
    ) -> ModbusResult<R> {
        let mut state = self.state.lock();
        let image = state
            .images
            .get_mut(&unit_id)
            .ok_or(ModbusError::UnitNotFound(unit_id))?;
        let result = f(image);
        state.current = unit_id;
        Ok(result)
    }

    pub fn with_current<R>(&self, f: impl FnOnce(&mut ProcessImage) -> R) -> ModbusResult<R> {
        Ok(f(self.state.lock().current_image()?))
    }

    current_unit_accessors! {
        coil, set_coil, add_coil, remove_coil, coil_range, coil_count => bool;
        discrete_input, set_discrete_input, add_discrete_input, remove_discrete_input,
            discrete_input_range, discrete_input_count => bool;
        input_register, set_input_register, add_input_register, remove_input_register,
            input_register_range, input_register_count => u16;
        holding_register, set_holding_register, add_holding_register, remove_holding_register,
            holding_register_range, holding_register_count => u16;
    }
}

impl UnitFilter for UnitRegistry {
    fn accepts(&self, unit_id: u8) -> bool {
        self.contains_unit(unit_id)
    }
}
