use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::pattern::{Pattern, PatternId, PatternRecord};
use crate::config::PatternConfig;
use crate::shared::Note;

/// Owns every pattern and knows which one is playing.
#[derive(Debug)]
pub struct PatternStore {
    patterns: Vec<Pattern>,
    current: Option<PatternId>,
    default_steps: usize,
    cooldown: Duration,
    last_created: Option<(Instant, PatternId)>,
    created_total: usize,
}

impl PatternStore {
    pub fn new(config: &PatternConfig) -> Self {
        Self {
            patterns: Vec::new(),
            current: None,
            default_steps: config.default_steps,
            cooldown: Duration::try_from_secs_f64(config.create_cooldown).unwrap_or_default(),
            last_created: None,
            created_total: 0,
        }
    }

    pub fn create(&mut self, name: Option<&str>) -> PatternId {
        self.create_at(name, Instant::now())
    }

    /// Makes a new empty pattern current. A second call inside the cooldown
    /// hands back the pattern the first call made (one press, one pattern).
    pub fn create_at(&mut self, name: Option<&str>, at: Instant) -> PatternId {
        if let Some((when, id)) = self.last_created {
            let recent = at.saturating_duration_since(when) < self.cooldown;
            if recent && self.get(id).is_some() {
                debug!(%id, "pattern creation debounced");
                self.current = Some(id);
                return id;
            }
        }

        self.created_total += 1;
        let name = name
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Pattern {}", self.created_total));
        let pattern = Pattern::new(name, self.default_steps);
        let id = pattern.id();
        info!(%id, name = %pattern.name, "pattern created");
        self.patterns.push(pattern);
        self.current = Some(id);
        self.last_created = Some((at, id));
        id
    }

    pub fn get(&self, id: PatternId) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.id() == id)
    }

    pub fn get_mut(&mut self, id: PatternId) -> Option<&mut Pattern> {
        self.patterns.iter_mut().find(|p| p.id() == id)
    }

    pub fn current_id(&self) -> Option<PatternId> {
        self.current
    }

    pub fn current(&self) -> Option<&Pattern> {
        self.get(self.current?)
    }

    pub fn current_mut(&mut self) -> Option<&mut Pattern> {
        let id = self.current?;
        self.get_mut(id)
    }

    pub fn set_current(&mut self, id: PatternId) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.current = Some(id);
        true
    }

    /// Removes a pattern. Deleting the current one leaves nothing current.
    pub fn delete(&mut self, id: PatternId) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|p| p.id() != id);
        if self.patterns.len() == before {
            return false;
        }
        if self.current == Some(id) {
            self.current = None;
        }
        info!(%id, "pattern deleted");
        true
    }

    pub fn ids(&self) -> Vec<PatternId> {
        self.patterns.iter().map(Pattern::id).collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Position of the current pattern and the total, for display.
    pub fn current_position(&self) -> Option<(usize, usize)> {
        let id = self.current?;
        let index = self.patterns.iter().position(|p| p.id() == id)?;
        Some((index, self.patterns.len()))
    }

    /// Cycles to the pattern after the current one.
    pub fn select_next(&mut self) -> Option<PatternId> {
        if self.patterns.is_empty() {
            return None;
        }
        let next = match self.current_position() {
            Some((i, n)) => (i + 1) % n,
            None => 0,
        };
        let id = self.patterns[next].id();
        self.current = Some(id);
        Some(id)
    }

    /// Records a hit on the current pattern.
    pub fn record_note(&mut self, note: Note, step: usize, velocity: f32) -> bool {
        match self.current_mut() {
            Some(pattern) => pattern.record(note, step, velocity),
            None => false,
        }
    }

    pub fn records(&self) -> Vec<PatternRecord> {
        self.patterns.iter().map(Pattern::to_record).collect()
    }

    /// Replaces the contents with loaded records.
    pub fn load_records(&mut self, records: Vec<PatternRecord>, current: Option<&str>) {
        self.patterns = records.into_iter().map(Pattern::from).collect();
        // two records with the same id would make lookups ambiguous
        let mut seen = std::collections::HashSet::new();
        self.patterns.retain(|p| seen.insert(p.id()));
        self.created_total = self.patterns.len();
        self.last_created = None;
        self.current = current
            .and_then(|s| s.parse::<PatternId>().ok())
            .filter(|id| self.get(*id).is_some())
            .or_else(|| self.patterns.first().map(Pattern::id));
    }
}
