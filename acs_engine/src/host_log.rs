use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::host::{GameType, PrintStyle, ScriptHost, SoundOrigin, Surface};
use crate::instance::{ActorId, LineId, Trigger};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostEvent {
    Special {
        special: i32,
        args: [i32; 5],
        activator: Option<ActorId>,
        line: Option<LineId>,
    },
    ChangeFlat {
        tag: i32,
        surface: Surface,
        flat: String,
    },
    LineBlocking {
        line_tag: i32,
        blocking: bool,
    },
    LineSpecial {
        line_tag: i32,
        special: i32,
        args: [i32; 5],
    },
    LineTexture {
        line_tag: i32,
        side: i32,
        position: i32,
        texture: String,
    },
    ClearLineSpecial {
        line: LineId,
    },
    Sound {
        sound: String,
        volume: i32,
        origin: SoundOrigin,
    },
    SoundSequence {
        sequence: String,
        origin: SoundOrigin,
    },
    Print {
        text: String,
        recipient: Option<ActorId>,
        style: PrintStyle,
    },
}

/// Host that records every side effect and answers queries from canned
/// state. Backs the runner binary and the test suites.
#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    events: Vec<HostEvent>,
    busy_tags: BTreeSet<i32>,
    busy_polys: BTreeSet<i32>,
    thing_counts: BTreeMap<(i32, i32), i32>,
    players: i32,
    game_type: GameType,
    skill: i32,
    level_time: i32,
}

impl RecordingHost {
    pub fn new() -> Self {
        RecordingHost {
            players: 1,
            skill: 2,
            ..RecordingHost::default()
        }
    }

    pub fn events(&self) -> &[HostEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn prints(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                HostEvent::Print { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn set_tag_busy(&mut self, tag: i32, busy: bool) {
        if busy {
            self.busy_tags.insert(tag);
        } else {
            self.busy_tags.remove(&tag);
        }
    }

    pub fn set_poly_busy(&mut self, poly: i32, busy: bool) {
        if busy {
            self.busy_polys.insert(poly);
        } else {
            self.busy_polys.remove(&poly);
        }
    }

    pub fn set_thing_count(&mut self, thing_type: i32, tid: i32, count: i32) {
        self.thing_counts.insert((thing_type, tid), count);
    }

    pub fn set_game(&mut self, players: i32, game_type: GameType, skill: i32) {
        self.players = players;
        self.game_type = game_type;
        self.skill = skill;
    }

    /// Advances the level clock by one tick.
    pub fn advance(&mut self) {
        self.level_time = self.level_time.saturating_add(1);
    }
}

impl ScriptHost for RecordingHost {
    fn execute_special(&mut self, special: i32, args: [i32; 5], trigger: &Trigger) -> bool {
        self.events.push(HostEvent::Special {
            special,
            args,
            activator: trigger.activator,
            line: trigger.line,
        });
        true
    }

    fn thing_count(&mut self, thing_type: i32, tid: i32) -> i32 {
        self.thing_counts
            .get(&(thing_type, tid))
            .copied()
            .unwrap_or(0)
    }

    fn change_flat(&mut self, tag: i32, surface: Surface, flat: &str) {
        self.events.push(HostEvent::ChangeFlat {
            tag,
            surface,
            flat: flat.to_string(),
        });
    }

    fn set_line_blocking(&mut self, line_tag: i32, blocking: bool) {
        self.events.push(HostEvent::LineBlocking { line_tag, blocking });
    }

    fn set_line_special(&mut self, line_tag: i32, special: i32, args: [i32; 5]) {
        self.events.push(HostEvent::LineSpecial {
            line_tag,
            special,
            args,
        });
    }

    fn set_line_texture(&mut self, line_tag: i32, side: i32, position: i32, texture: &str) {
        self.events.push(HostEvent::LineTexture {
            line_tag,
            side,
            position,
            texture: texture.to_string(),
        });
    }

    fn clear_line_special(&mut self, line: LineId) {
        self.events.push(HostEvent::ClearLineSpecial { line });
    }

    fn start_sound(&mut self, sound: &str, volume: i32, origin: SoundOrigin) {
        self.events.push(HostEvent::Sound {
            sound: sound.to_string(),
            volume,
            origin,
        });
    }

    fn start_sound_sequence(&mut self, sequence: &str, origin: SoundOrigin) {
        self.events.push(HostEvent::SoundSequence {
            sequence: sequence.to_string(),
            origin,
        });
    }

    fn print(&mut self, text: &str, recipient: Option<ActorId>, style: PrintStyle) {
        self.events.push(HostEvent::Print {
            text: text.to_string(),
            recipient,
            style,
        });
    }

    fn tag_busy(&self, tag: i32) -> bool {
        self.busy_tags.contains(&tag)
    }

    fn poly_busy(&self, poly: i32) -> bool {
        self.busy_polys.contains(&poly)
    }

    fn player_count(&self) -> i32 {
        self.players
    }

    fn game_type(&self) -> GameType {
        self.game_type
    }

    fn game_skill(&self) -> i32 {
        self.skill
    }

    fn level_time(&self) -> i32 {
        self.level_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_host_tracks_side_effects() {
        let mut host = RecordingHost::new();
        host.change_flat(4, Surface::Floor, "FLAT1");
        host.start_sound("Door", 127, SoundOrigin::Things(9));
        host.print("hello", None, PrintStyle::Bold);

        assert_eq!(
            host.events(),
            &[
                HostEvent::ChangeFlat {
                    tag: 4,
                    surface: Surface::Floor,
                    flat: "FLAT1".to_string(),
                },
                HostEvent::Sound {
                    sound: "Door".to_string(),
                    volume: 127,
                    origin: SoundOrigin::Things(9),
                },
                HostEvent::Print {
                    text: "hello".to_string(),
                    recipient: None,
                    style: PrintStyle::Bold,
                },
            ]
        );
        assert_eq!(host.prints(), vec!["hello"]);
    }

    #[test]
    fn canned_queries_answer_from_state() {
        let mut host = RecordingHost::new();
        host.set_thing_count(0, 5, 3);
        host.set_tag_busy(7, true);
        assert_eq!(host.thing_count(0, 5), 3);
        assert_eq!(host.thing_count(1, 5), 0);
        assert!(host.tag_busy(7));
        host.set_tag_busy(7, false);
        assert!(!host.tag_busy(7));
        assert_eq!(host.player_count(), 1);
        host.advance();
        assert_eq!(host.level_time(), 1);
    }
}
