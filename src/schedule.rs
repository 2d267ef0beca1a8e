//! Ad break scheduling: resolve the configured schedule into pre/mid/post
//! roll breaks and watch content playback for midroll cue points.

use crate::config::{AdSource, OffsetConfig, PluginOptions, ScheduleItemConfig};
use crate::error::Result;
use crate::vast::parser::parse_duration;
use tracing::warn;

/// Where in the content an ad break plays
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Offset {
    Pre,
    Post,
    /// Midroll at a fixed content time
    Seconds(f64),
    /// Midroll at a percentage of the content duration
    Percent(f64),
}

impl Offset {
    fn from_config(config: Option<&OffsetConfig>) -> Self {
        match config {
            None => Offset::Pre,
            Some(OffsetConfig::Seconds(s)) => Offset::Seconds(*s),
            Some(OffsetConfig::Text(text)) => match text.as_str() {
                "pre" => Offset::Pre,
                "post" => Offset::Post,
                t if t.ends_with('%') => match t.trim_end_matches('%').parse::<f64>() {
                    Ok(pct) => Offset::Percent(pct),
                    Err(_) => {
                        warn!("Invalid percent offset {}, treating break as preroll", t);
                        Offset::Pre
                    }
                },
                t if t.contains(':') => Offset::Seconds(parse_duration(t)),
                t => {
                    warn!("Unrecognized offset {}, treating break as preroll", t);
                    Offset::Pre
                }
            },
        }
    }

    /// Content time this offset resolves to. Percent offsets stay unresolved
    /// until the player reports a finite duration.
    pub fn in_seconds(&self, duration: f64) -> Option<f64> {
        match self {
            Offset::Pre => Some(0.0),
            Offset::Post => None,
            Offset::Seconds(s) => Some(*s),
            Offset::Percent(pct) => {
                (duration.is_finite() && duration > 0.0).then(|| duration * pct / 100.0)
            }
        }
    }
}

/// One resolved ad break
#[derive(Debug, Clone)]
pub struct ScheduleItem {
    pub offset: Offset,
    pub source: AdSource,
}

/// The full resolved break schedule for one content playback
#[derive(Debug, Clone, Default)]
pub struct ResolvedSchedule {
    items: Vec<ScheduleItem>,
}

impl ResolvedSchedule {
    /// Resolve the configured schedule. An empty schedule synthesizes a
    /// single preroll from the top-level `url`/`xml` options.
    pub fn from_options(options: &PluginOptions) -> Result<Self> {
        if options.schedule.is_empty() {
            let synthesized = ScheduleItemConfig {
                offset: None,
                url: options.url.clone(),
                xml: options.xml.clone(),
            };
            return Ok(Self {
                items: vec![ScheduleItem {
                    offset: Offset::Pre,
                    source: synthesized.source()?,
                }],
            });
        }

        let mut items = Vec::with_capacity(options.schedule.len());
        for config in &options.schedule {
            items.push(ScheduleItem {
                offset: Offset::from_config(config.offset.as_ref()),
                source: config.source()?,
            });
        }
        Ok(Self { items })
    }

    pub fn preroll(&self) -> Option<&ScheduleItem> {
        self.items.iter().find(|i| i.offset == Offset::Pre)
    }

    pub fn postroll(&self) -> Option<&ScheduleItem> {
        self.items.iter().find(|i| i.offset == Offset::Post)
    }

    pub fn midrolls(&self) -> Vec<&ScheduleItem> {
        self.items
            .iter()
            .filter(|i| matches!(i.offset, Offset::Seconds(_) | Offset::Percent(_)))
            .collect()
    }
}

#[derive(Debug)]
struct MidrollEntry {
    offset: Offset,
    source: AdSource,
    seconds: Option<f64>,
    played: bool,
}

/// Watches content time updates and hands out each midroll break once.
///
/// Locked while a break is loading or playing so a single cue point never
/// triggers twice off closely spaced time updates.
#[derive(Debug, Default)]
pub struct MidrollWatcher {
    entries: Vec<MidrollEntry>,
    locked: bool,
}

impl MidrollWatcher {
    pub fn new(schedule: &ResolvedSchedule) -> Self {
        Self {
            entries: schedule
                .midrolls()
                .into_iter()
                .map(|item| MidrollEntry {
                    offset: item.offset,
                    source: item.source.clone(),
                    seconds: None,
                    played: false,
                })
                .collect(),
            locked: false,
        }
    }

    /// Returns the source of a midroll due at `current_time`, locking the
    /// watcher until `unlock` is called.
    pub fn check(&mut self, current_time: f64, duration: f64) -> Option<AdSource> {
        if self.locked {
            return None;
        }

        for entry in &mut self.entries {
            if entry.played {
                continue;
            }
            if entry.seconds.is_none() {
                entry.seconds = entry.offset.in_seconds(duration);
            }
            let Some(at) = entry.seconds else { continue };
            if current_time >= at {
                entry.played = true;
                self.locked = true;
                return Some(entry.source.clone());
            }
        }
        None
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }
}
