use serde::{Deserialize, Serialize};

pub use acs_formats::Surface;

use crate::instance::{ActorId, LineId, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SoundOrigin {
    /// Heard everywhere without attenuation.
    Ambient,
    /// Emitted from the front sector of a line.
    LineSector(LineId),
    /// Emitted by every thing carrying this tid.
    Things(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintStyle {
    Normal,
    Bold,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    #[default]
    Single,
    Cooperative,
    Deathmatch,
}

impl GameType {
    pub fn as_int(self) -> i32 {
        match self {
            GameType::Single => 0,
            GameType::Cooperative => 1,
            GameType::Deathmatch => 2,
        }
    }
}

/// Map/game services the interpreter reaches through its instructions.
///
/// All calls are infallible from the VM's point of view: the host swallows or
/// logs its own failures.
pub trait ScriptHost {
    /// Runs a parameterized map special. Returns whether it had an effect.
    fn execute_special(&mut self, special: i32, args: [i32; 5], trigger: &Trigger) -> bool;

    /// Counts live things matching `thing_type` and/or `tid` (0 matches any),
    /// skipping killable things that are already dead.
    fn thing_count(&mut self, thing_type: i32, tid: i32) -> i32;

    fn change_flat(&mut self, tag: i32, surface: Surface, flat: &str);

    fn set_line_blocking(&mut self, line_tag: i32, blocking: bool);

    fn set_line_special(&mut self, line_tag: i32, special: i32, args: [i32; 5]);

    fn set_line_texture(&mut self, line_tag: i32, side: i32, position: i32, texture: &str);

    fn clear_line_special(&mut self, line: LineId);

    fn start_sound(&mut self, sound: &str, volume: i32, origin: SoundOrigin);

    fn start_sound_sequence(&mut self, sequence: &str, origin: SoundOrigin);

    /// Shows a message to `recipient`, or to every player when `None`.
    fn print(&mut self, text: &str, recipient: Option<ActorId>, style: PrintStyle);

    /// Whether sectors carrying `tag` still have a moving special attached.
    fn tag_busy(&self, tag: i32) -> bool;

    /// Whether polyobject `poly` is still moving.
    fn poly_busy(&self, poly: i32) -> bool;

    fn player_count(&self) -> i32;

    fn game_type(&self) -> GameType;

    fn game_skill(&self) -> i32;

    /// Ticks elapsed on the current map.
    fn level_time(&self) -> i32;
}
