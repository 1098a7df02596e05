pub mod directive;
pub mod netlist;
pub mod prn;
pub mod runner;
pub mod values;
pub mod waveform;

pub use directive::render_deck;
pub use netlist::{Component, IncludeDirective, NetlistDocument};
pub use runner::{Simulate, SimulatorConfig, XyceRunner};
pub use values::{format_spice_number, parse_spice_number};
pub use waveform::Waveform;
