use std::collections::HashMap;

use crate::image::Image;
use crate::{PatchError, Result};

/// One image shared by every step of a patch run, plus the addresses earlier
/// steps have published for later ones.
pub struct PatchSession {
    pub image: Image,
    symbols: HashMap<String, u32>,
}

impl PatchSession {
    pub fn new(image: Image) -> Self {
        PatchSession {
            image,
            symbols: HashMap::new(),
        }
    }

    pub fn define(&mut self, name: &str, cpu_addr: u32) {
        log::debug!("symbol {} = {:#08X}", name, cpu_addr);
        self.symbols.insert(name.to_string(), cpu_addr);
    }

    pub fn symbol(&self, name: &str) -> Result<u32> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| PatchError::UnknownSymbol(name.to_string()))
    }

    pub fn symbols(&self) -> &HashMap<String, u32> {
        &self.symbols
    }

    pub fn into_image(self) -> Image {
        self.image
    }
}

pub trait PatchStep {
    fn name(&self) -> &str;

    fn apply(&self, session: &mut PatchSession) -> Result<()>;
}

/// Patch steps run strictly in the order they were added. A failure stops
/// the run; bytes written by earlier steps stay written.
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn PatchStep>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline { steps: Vec::new() }
    }

    pub fn push(&mut self, step: impl PatchStep + 'static) {
        self.steps.push(Box::new(step));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn run(&self, session: &mut PatchSession) -> Result<()> {
        for (i, step) in self.steps.iter().enumerate() {
            log::info!("[{}/{}] {}", i + 1, self.steps.len(), step.name());
            step.apply(session).map_err(|source| PatchError::Step {
                step: step.name().to_string(),
                source: Box::new(source),
            })?;
        }
        log::info!(
            "patching done, {:#X} bytes of free space left",
            session.image.space().total_free()
        );
        Ok(())
    }
}
