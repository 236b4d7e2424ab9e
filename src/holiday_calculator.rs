// src/holiday_calculator.rs
use chrono::{Datelike, Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

use crate::models::{
    BaseEvent, CalculationRule, DayMonth, DefinitionId, HolidayDefinition, HolidayRule,
    NewHolidayInstance,
};

/// Why a definition produced no date for a given year.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    #[error("definition must set exactly one of date, day_month or calculation_rule")]
    MalformedDefinition,
    #[error("fixed date {date} falls outside {year}")]
    OutsideYear { date: NaiveDate, year: i32 },
    #[error("{day_month} does not exist in {year}")]
    NoSuchDay { day_month: DayMonth, year: i32 },
    #[error("base holiday {base_holiday_id} does not exist")]
    UnknownBase { base_holiday_id: DefinitionId },
    #[error("base holiday {base_holiday_id} is itself computed from another holiday")]
    DependentBase { base_holiday_id: DefinitionId },
    #[error("base holiday {base_holiday_id} has no date in this year")]
    UnresolvedBase { base_holiday_id: DefinitionId },
    #[error("resulting date is outside the supported calendar range")]
    OutOfRange,
}

impl Unresolved {
    /// Outcomes that are a normal consequence of the rule, not a data problem.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Unresolved::OutsideYear { .. } | Unresolved::NoSuchDay { .. }
        )
    }
}

pub type Outcome = Result<NaiveDate, Unresolved>;

/// Per-year arena of definition id -> outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    year: i32,
    outcomes: BTreeMap<DefinitionId, Outcome>,
}

impl Resolution {
    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn get(&self, id: DefinitionId) -> Option<&Outcome> {
        self.outcomes.get(&id)
    }

    pub fn date_of(&self, id: DefinitionId) -> Option<NaiveDate> {
        self.outcomes.get(&id).and_then(|outcome| outcome.as_ref().ok().copied())
    }

    pub fn resolved(&self) -> impl Iterator<Item = (DefinitionId, NaiveDate)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| outcome.as_ref().ok().map(|date| (*id, *date)))
    }

    pub fn unresolved(&self) -> impl Iterator<Item = (DefinitionId, &Unresolved)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| outcome.as_ref().err().map(|reason| (*id, reason)))
    }
}

/// Resolves holiday definitions into dates. Holds a per-year Easter cache, so
/// one calculator should be reused across a batch.
#[derive(Debug, Default)]
pub struct HolidayCalculator {
    easter_cache: HashMap<i32, Option<NaiveDate>>,
}

impl HolidayCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn easter_sunday(&mut self, year: i32) -> Option<NaiveDate> {
        *self
            .easter_cache
            .entry(year)
            .or_insert_with(|| compute_easter_sunday(year))
    }

    fn event_date(&mut self, event: BaseEvent, year: i32) -> Option<NaiveDate> {
        match event {
            BaseEvent::Easter => self.easter_sunday(year),
        }
    }

    /// Resolves every definition for `year`.
    ///
    /// Phase one handles fixed dates, annual days and event offsets. Phase two
    /// handles holiday-based rules and only sees phase-one outcomes, so a rule
    /// based on another holiday-based rule stays unresolved.
    pub fn compute_year(&mut self, definitions: &[HolidayDefinition], year: i32) -> Resolution {
        let mut outcomes: BTreeMap<DefinitionId, Outcome> = BTreeMap::new();
        let mut dependent: Vec<(DefinitionId, DefinitionId, i32)> = Vec::new();

        for definition in definitions {
            let outcome = match definition.rule() {
                None => Err(Unresolved::MalformedDefinition),
                Some(HolidayRule::Fixed(date)) => {
                    if date.year() == year {
                        Ok(date)
                    } else {
                        Err(Unresolved::OutsideYear { date, year })
                    }
                }
                Some(HolidayRule::Annual(day_month)) => day_month
                    .in_year(year)
                    .ok_or(Unresolved::NoSuchDay { day_month, year }),
                Some(HolidayRule::Calculated(CalculationRule::Event { base_event, offset })) => {
                    self.event_date(*base_event, year)
                        .ok_or(Unresolved::OutOfRange)
                        .and_then(|base| shift(base, *offset))
                }
                Some(HolidayRule::Calculated(CalculationRule::Holiday {
                    base_holiday_id,
                    offset,
                })) => {
                    dependent.push((definition.id, *base_holiday_id, *offset));
                    continue;
                }
            };
            outcomes.insert(definition.id, outcome);
        }

        let phase_two: Vec<(DefinitionId, Outcome)> = dependent
            .iter()
            .map(|&(id, base_holiday_id, offset)| {
                let outcome = match outcomes.get(&base_holiday_id) {
                    Some(Ok(base)) => shift(*base, offset),
                    Some(Err(_)) => Err(Unresolved::UnresolvedBase { base_holiday_id }),
                    None if dependent.iter().any(|(other, ..)| *other == base_holiday_id) => {
                        Err(Unresolved::DependentBase { base_holiday_id })
                    }
                    None => Err(Unresolved::UnknownBase { base_holiday_id }),
                };
                (id, outcome)
            })
            .collect();
        outcomes.extend(phase_two);

        Resolution { year, outcomes }
    }

    /// Instances for every definition that resolves in `year`.
    pub fn instances(
        &mut self,
        definitions: &[HolidayDefinition],
        year: i32,
    ) -> Vec<NewHolidayInstance> {
        let resolution = self.compute_year(definitions, year);
        collect_instances(definitions, &resolution)
    }

    /// Instances whose date falls in `year`. Rules anchored in the previous
    /// or next year can cross the boundary by their offset, so those years
    /// are resolved too. Offsets are limited to `MAX_OFFSET_DAYS`, which
    /// keeps every crossing within one year.
    pub fn instances_dated_in(
        &mut self,
        definitions: &[HolidayDefinition],
        year: i32,
    ) -> Vec<NewHolidayInstance> {
        let mut instances: Vec<NewHolidayInstance> = Vec::new();
        let anchors: BTreeSet<i32> = [year.saturating_sub(1), year, year.saturating_add(1)]
            .into_iter()
            .collect();
        for anchor in anchors {
            instances.extend(
                self.instances(definitions, anchor)
                    .into_iter()
                    .filter(|instance| instance.date.year() == year),
            );
        }
        instances.sort_by_key(|instance| (instance.date, instance.holiday_definition_id));
        instances.dedup_by_key(|instance| (instance.date, instance.holiday_definition_id));
        instances
    }
}

/// Largest offset, in either direction, a calculated rule may carry. A
/// holiday-based rule adds its offset to an event-based base, so the total
/// shift stays within 366 days.
pub const MAX_OFFSET_DAYS: i32 = 183;

pub fn collect_instances(
    definitions: &[HolidayDefinition],
    resolution: &Resolution,
) -> Vec<NewHolidayInstance> {
    definitions
        .iter()
        .filter_map(|definition| {
            resolution
                .date_of(definition.id)
                .map(|date| NewHolidayInstance {
                    holiday_definition_id: definition.id,
                    name: definition.name.clone(),
                    date,
                })
        })
        .collect()
}

fn shift(base: NaiveDate, offset: i32) -> Outcome {
    base.checked_add_signed(Duration::days(i64::from(offset)))
        .ok_or(Unresolved::OutOfRange)
}

/// Anonymous Gregorian computus (Meeus/Jones/Butcher).
pub fn compute_easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year.rem_euclid(19);
    let b = year.div_euclid(100);
    let c = year.rem_euclid(100);
    let d = b.div_euclid(4);
    let e = b.rem_euclid(4);
    let f = (b + 8).div_euclid(25);
    let g = (b - f + 1).div_euclid(3);
    let h = (19 * a + b - d - g + 15).rem_euclid(30);
    let i = c.div_euclid(4);
    let k = c.rem_euclid(4);
    let l = (32 + 2 * e + 2 * i - h - k).rem_euclid(7);
    let m = (a + 11 * h + 22 * l).div_euclid(451);
    let month = (h + l - 7 * m + 114).div_euclid(31);
    let day = (h + l - 7 * m + 114).rem_euclid(31) + 1;
    NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
}
