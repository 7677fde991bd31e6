use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::assemble::{Item, Routine};
use crate::dispatch::{build_dispatch, relocate_table, DispatchExtension, PointerRef, TableRelocation};
use crate::freespace::Placement;
use crate::image::WriteKind;
use crate::layout::{de_u32, de_usize};
use crate::patcher::{apply_jump_patch_with, place_routine, HookSite};
use crate::pipeline::{PatchSession, PatchStep, Pipeline};
use crate::records::RecordCodec;
use crate::{PatchError, Result};

fn default_boundary() -> usize {
    0x10000
}

/// Placement fields shared by every step that allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementSpec {
    #[serde(default = "default_boundary", deserialize_with = "de_usize")]
    pub boundary: usize,
    #[serde(default, deserialize_with = "de_usize")]
    pub hint: usize,
}

impl Default for PlacementSpec {
    fn default() -> Self {
        PlacementSpec {
            boundary: default_boundary(),
            hint: 0,
        }
    }
}

impl From<PlacementSpec> for Placement {
    fn from(spec: PlacementSpec) -> Self {
        Placement::within(spec.boundary).at_or_after(spec.hint)
    }
}

/// One step of a patch plan file. Steps that produce code or data publish
/// their CPU address under `name` (and `name.label` for each label).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    WriteBytes {
        #[serde(deserialize_with = "de_usize")]
        address: usize,
        bytes: Vec<u8>,
        #[serde(default)]
        mark_used: bool,
    },
    MarkFree {
        #[serde(deserialize_with = "de_usize")]
        start: usize,
        #[serde(deserialize_with = "de_usize")]
        end: usize,
    },
    PlaceRoutine {
        name: String,
        routine: Routine,
        #[serde(flatten)]
        placement: PlacementSpec,
    },
    JumpPatch {
        name: String,
        #[serde(deserialize_with = "de_usize")]
        hook: usize,
        #[serde(deserialize_with = "de_usize")]
        consumable: usize,
        routine: Routine,
        #[serde(flatten)]
        placement: PlacementSpec,
    },
    RelocateTable {
        name: String,
        #[serde(deserialize_with = "de_usize")]
        pointer: usize,
        #[serde(deserialize_with = "de_usize")]
        record_size: usize,
        #[serde(deserialize_with = "de_usize")]
        count: usize,
        #[serde(default)]
        extra: Vec<Vec<u8>>,
        #[serde(default)]
        references: Vec<PointerRef>,
        #[serde(flatten)]
        placement: PlacementSpec,
    },
    ExtendDispatch {
        name: String,
        split: u8,
        routines: Vec<Routine>,
        #[serde(deserialize_with = "de_usize")]
        hook: usize,
        #[serde(deserialize_with = "de_usize")]
        consumable: usize,
        #[serde(default)]
        preamble: Vec<Item>,
        #[serde(default)]
        passthrough: Vec<Item>,
        #[serde(deserialize_with = "de_u32")]
        resume: u32,
        #[serde(deserialize_with = "de_u32")]
        rejoin: u32,
        #[serde(flatten)]
        placement: PlacementSpec,
    },
}

impl PatchStep for PlanStep {
    fn name(&self) -> &str {
        match self {
            PlanStep::WriteBytes { .. } => "write_bytes",
            PlanStep::MarkFree { .. } => "mark_free",
            PlanStep::PlaceRoutine { name, .. }
            | PlanStep::JumpPatch { name, .. }
            | PlanStep::RelocateTable { name, .. }
            | PlanStep::ExtendDispatch { name, .. } => name.as_str(),
        }
    }

    fn apply(&self, session: &mut PatchSession) -> Result<()> {
        match self {
            PlanStep::WriteBytes {
                address,
                bytes,
                mark_used,
            } => {
                let kind = if *mark_used {
                    WriteKind::MarkUsed
                } else {
                    WriteKind::NoMark
                };
                session.image.write_at(*address, bytes, kind)?;
            }
            PlanStep::MarkFree { start, end } => {
                if start >= end || *end > session.image.len() {
                    return Err(PatchError::Config(format!(
                        "free range {:#X}..{:#X} is empty or outside the {:#X}-byte image",
                        start,
                        end,
                        session.image.len()
                    )));
                }
                session.image.space_mut().mark_free(*start..*end);
            }
            PlanStep::PlaceRoutine {
                name,
                routine,
                placement,
            } => {
                let externals = session.symbols().clone();
                let placed = place_routine(routine, &mut session.image, (*placement).into(), &externals)?;
                publish(session, name, placed.cpu_addr, &placed.labels);
            }
            PlanStep::JumpPatch {
                name,
                hook,
                consumable,
                routine,
                placement,
            } => {
                let hook = HookSite::new(*hook, *consumable)?;
                let externals = session.symbols().clone();
                let placed = apply_jump_patch_with(
                    routine,
                    hook,
                    &mut session.image,
                    (*placement).into(),
                    &externals,
                )?;
                publish(session, name, placed.cpu_addr, &placed.labels);
            }
            PlanStep::RelocateTable {
                name,
                pointer,
                record_size,
                count,
                extra,
                references,
                placement,
            } => {
                let source = RecordCodec::indirect(*pointer, *record_size, *count);
                let table = relocate_table(
                    &mut session.image,
                    &TableRelocation {
                        source: &source,
                        extra,
                        references,
                        placement: (*placement).into(),
                    },
                )?;
                let base = table.base(&session.image)?;
                let cpu = session.image.to_cpu(base)?;
                session.define(name, cpu);
            }
            PlanStep::ExtendDispatch {
                name,
                split,
                routines,
                hook,
                consumable,
                preamble,
                passthrough,
                resume,
                rejoin,
                placement,
            } => {
                let ext = DispatchExtension {
                    split: *split,
                    routines: routines.clone(),
                    hook: HookSite::new(*hook, *consumable)?,
                    preamble: preamble.clone(),
                    passthrough: passthrough.clone(),
                    resume: *resume,
                    rejoin: *rejoin,
                    placement: (*placement).into(),
                };
                let layout = build_dispatch(&mut session.image, &ext)?;
                let switch = session.image.to_cpu(layout.switch)?;
                session.define(name, switch);
                for (i, routine) in layout.routines.iter().enumerate() {
                    let cpu = session.image.to_cpu(*routine)?;
                    session.define(&format!("{}.{}", name, i), cpu);
                }
            }
        }
        Ok(())
    }
}

fn publish(
    session: &mut PatchSession,
    name: &str,
    cpu_addr: u32,
    labels: &std::collections::HashMap<String, u32>,
) {
    session.define(name, cpu_addr);
    for (label, addr) in labels {
        session.define(&format!("{}.{}", name, label), *addr);
    }
}

/// An ordered list of patch steps, usually read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchPlan {
    pub steps: Vec<PlanStep>,
}

impl PatchPlan {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn into_pipeline(self) -> Pipeline {
        let mut pipeline = Pipeline::new();
        for step in self.steps {
            pipeline.push(step);
        }
        pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freespace::SpaceManager;
    use crate::image::{Image, MemoryMap};

    const PLAN: &str = r#"{
        "steps": [
            {
                "kind": "place_routine",
                "name": "helper",
                "hint": "0x410000",
                "routine": [
                    { "instr": { "op": "LDA", "mode": "IMM8", "arg": "$01" } },
                    { "instr": { "op": "RTL", "mode": "NO_ARG" } }
                ]
            },
            {
                "kind": "jump_patch",
                "name": "hook",
                "hook": "0x01E5D8",
                "consumable": 6,
                "routine": [
                    { "instr": { "op": "JSL", "mode": "LNG", "arg": "helper" } },
                    { "bytes": [174, 244, 177] },
                    { "label": "back" },
                    { "instr": { "op": "JML", "mode": "LNG", "arg": "$C1E5DE" } }
                ]
            }
        ]
    }"#;

    fn image() -> Image {
        let space = SpaceManager::with_free_ranges([0x410000..0x420000]);
        Image::with_space(vec![0xFF; 0x420000], MemoryMap::ExHiRom, space)
    }

    #[test]
    fn plan_parses_and_runs_in_order() {
        let plan = PatchPlan::from_json(PLAN).unwrap();
        assert_eq!(plan.steps.len(), 2);

        let mut session = PatchSession::new(image());
        plan.into_pipeline().run(&mut session).unwrap();

        assert_eq!(session.symbol("helper").unwrap(), 0x410000);
        let hook = session.symbol("hook").unwrap();
        assert_eq!(hook, 0x410003);
        assert_eq!(session.symbol("hook.back").unwrap(), hook + 4 + 3);

        let image = session.into_image();
        assert_eq!(image.read_at(0x410000, 3).unwrap(), &[0xA9, 0x01, 0x6B]);
        assert_eq!(
            image.read_at(0x410003, 4).unwrap(),
            &[0x22, 0x00, 0x00, 0x41]
        );
        assert_eq!(image.read_at(0x01E5D8, 4).unwrap(), &[0x5C, 0x03, 0x00, 0x41]);
    }

    #[test]
    fn mark_free_outside_the_image_is_rejected() {
        let plan = PatchPlan::from_json(
            r#"{ "steps": [
                { "kind": "mark_free", "start": "0x500000", "end": "0x510000" },
                { "kind": "place_routine", "name": "x", "hint": "0x500000",
                  "routine": [{ "instr": { "op": "RTL", "mode": "NO_ARG" } }] }
            ] }"#,
        )
        .unwrap();
        let mut session = PatchSession::new(image());
        let err = plan.into_pipeline().run(&mut session).unwrap_err();
        match err {
            PatchError::Step { step, source } => {
                assert_eq!(step, "mark_free");
                assert!(matches!(*source, PatchError::Config(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!session.image.space().is_free(0x500000..0x500001));
        assert!(session.symbol("x").is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(PatchPlan::from_json(r#"{ "steps": [{ "kind": "format_disk" }] }"#).is_err());
    }

    #[test]
    fn placement_defaults_to_bank_boundary() {
        let step: PlanStep = serde_json::from_str(
            r#"{ "kind": "place_routine", "name": "x", "routine": [] }"#,
        )
        .unwrap();
        match step {
            PlanStep::PlaceRoutine { placement, .. } => {
                assert_eq!(placement, PlacementSpec::default())
            }
            other => panic!("unexpected step {other:?}"),
        }
    }
}
