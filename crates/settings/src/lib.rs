pub mod preferences;
pub mod recent;

pub use preferences::{
    BookPreferences, Preferences, PreferencesError, PreferencesStore, SearchPreferences,
};
pub use recent::RecentFiles;
