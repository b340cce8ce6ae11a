use std::fmt::Debug;

use crate::internal::*;

/// Look up a module transform by its command line name.
pub fn get_transform(name: &str) -> Option<Box<dyn ModuleTransform>> {
    match name {
        "bf16-mixed-precision-removal" => Some(Box::new(Bf16MixedPrecisionRemoval)),
        "despecializer" => Some(Box::new(Despecializer)),
        _ => None,
    }
}

pub trait ModuleTransform: Debug + Send + Sync {
    fn name(&self) -> StaticName;
    /// Rewrite the module in place. Returns true if anything changed.
    fn transform(&self, module: &mut HloModule) -> HloResult<bool>;
    fn transform_into(&self, module: &HloModule) -> HloResult<HloModule> {
        let mut module = module.clone();
        self.transform(&mut module)?;
        Ok(module)
    }
}

/// Promotes every reduced precision element type to f32, so the module
/// computes at full precision.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bf16MixedPrecisionRemoval;

impl ModuleTransform for Bf16MixedPrecisionRemoval {
    fn name(&self) -> StaticName {
        "bf16-mixed-precision-removal".into()
    }

    fn transform(&self, module: &mut HloModule) -> HloResult<bool> {
        let mut changed = false;
        for inst in &mut module.instructions {
            for shape in inst.shapes_mut() {
                if shape.element_type.is_reduced_precision() {
                    shape.element_type = PrimitiveType::F32;
                    changed = true;
                }
            }
        }
        debug!("{} on {}: changed={}", self.name(), module.name, changed);
        Ok(changed)
    }
}

/// Strips physical layout choices: every shape gets the default row major
/// layout, leaving a backend neutral module.
#[derive(Debug, Clone, Copy, Default)]
pub struct Despecializer;

impl ModuleTransform for Despecializer {
    fn name(&self) -> StaticName {
        "despecializer".into()
    }

    fn transform(&self, module: &mut HloModule) -> HloResult<bool> {
        let mut changed = false;
        for inst in &mut module.instructions {
            for shape in inst.shapes_mut() {
                let default = Layout::default_for(shape.rank());
                if shape.layout.as_ref() != Some(&default) {
                    shape.layout = Some(default);
                    changed = true;
                }
            }
        }
        debug!("{} on {}: changed={}", self.name(), module.name, changed);
        Ok(changed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const TEXT: &str = r#"
        HloModule t
        ENTRY main {
          activation = bf16[1,4,4,2]{3,0,2,1} parameter(0)
          kernel = bf16[3,3,1,2]{3,2,1,0} parameter(1)
          ROOT conv = bf16[1,2,2,2]{0,3,2,1} convolution(bf16[1,4,4,2]{3,0,2,1} activation, kernel),
              window={size=3x3}, dim_labels=b01f_01io->b01f, feature_group_count=2
        }"#;

    #[test]
    fn remove_mixed_precision() {
        let mut module = parse_module(TEXT).unwrap();
        assert!(Bf16MixedPrecisionRemoval.transform(&mut module).unwrap());
        assert!(module.instructions.iter().all(|i| i.shape.element_type == PrimitiveType::F32));
        let annotated = module.root().unwrap().operands[0].shape.as_ref().unwrap();
        assert_eq!(annotated.element_type, PrimitiveType::F32);
        module.validate().unwrap();
        assert!(!Bf16MixedPrecisionRemoval.transform(&mut module).unwrap());
    }

    #[test]
    fn despecialize_layouts() {
        let module = parse_module(TEXT).unwrap();
        let despecialized = Despecializer.transform_into(&module).unwrap();
        for inst in &despecialized.instructions {
            assert_eq!(inst.shape.layout, Some(Layout::default_for(4)));
        }
        assert_eq!(despecialized.instructions[0].shape.element_type, PrimitiveType::BF16);
        despecialized.validate().unwrap();
    }

    #[test]
    fn transforms_by_name() {
        assert_eq!(get_transform("despecializer").unwrap().name(), "despecializer");
        assert!(get_transform("bf16-mixed-precision-removal").is_some());
        assert!(get_transform("algebraic-simplifier").is_none());
    }
}
