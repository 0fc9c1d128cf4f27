mod journal;
mod mood;
mod ritual;

pub use journal::{JournalEntry, RemoteJournalEntry};
pub use mood::{MoodEntry, RemoteMood};
pub use ritual::{RemoteCompletion, RemoteRitual, Ritual, RitualCompletion, RitualStep};
