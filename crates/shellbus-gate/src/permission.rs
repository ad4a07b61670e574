//! Permission classes and origin classification.
//!
//! Classification is a fixed rule table from an [`Origin`] to a [`Surface`];
//! each [`PermissionClass`] is a predicate over surfaces. Nothing here has
//! state, so a context's grants are recomputed on every call.

use std::fmt;

use serde::{Deserialize, Serialize};
use shellbus_core::{ExecutionContext, Origin};

/// Protocol of privileged browser UI surfaces.
pub const INTERNAL_PROTOCOL: &str = "shell-internal:";

/// Protocol of built-in application pages.
pub const APP_PROTOCOL: &str = "shell:";

/// Coarse privilege tier an operation requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionClass {
    /// Any context, including untrusted web pages.
    All,
    /// Built-in application pages and extension management.
    PrivilegedApp,
    /// Browser chrome: main UI, popups, omnibox and the new-tab page.
    PrivilegedBrowserUi,
    /// Surfaces that act on the current browsing session.
    SessionScoped,
    /// Surfaces allowed to read and change settings.
    SettingsScoped,
}

impl PermissionClass {
    /// Every class, for exhaustive checks.
    pub const ALL: [Self; 5] = [
        Self::All,
        Self::PrivilegedApp,
        Self::PrivilegedBrowserUi,
        Self::SessionScoped,
        Self::SettingsScoped,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::PrivilegedApp => "privileged-app",
            Self::PrivilegedBrowserUi => "privileged-browser-ui",
            Self::SessionScoped => "session-scoped",
            Self::SettingsScoped => "settings-scoped",
        }
    }
}

impl fmt::Display for PermissionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of surface a context is, derived from its origin alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    MainUi,
    PopupUi,
    OmniboxUi,
    NewTab,
    OmniboxDebug,
    Extensions,
    /// Any other `shell-internal:` page.
    InternalPage,
    /// Any other `shell:` page.
    AppPage,
    /// Everything else, including web pages.
    Web,
}

/// Exact-location rules, checked before the protocol fallbacks.
const LOCATION_RULES: &[(&str, &str, Surface)] = &[
    (INTERNAL_PROTOCOL, "main-ui", Surface::MainUi),
    (INTERNAL_PROTOCOL, "popup-ui", Surface::PopupUi),
    (INTERNAL_PROTOCOL, "omnibox", Surface::OmniboxUi),
    (APP_PROTOCOL, "new-tab", Surface::NewTab),
    (APP_PROTOCOL, "omnibox", Surface::OmniboxDebug),
    (APP_PROTOCOL, "extensions", Surface::Extensions),
];

impl Surface {
    /// Every surface, for exhaustive checks.
    pub const ALL: [Self; 9] = [
        Self::MainUi,
        Self::PopupUi,
        Self::OmniboxUi,
        Self::NewTab,
        Self::OmniboxDebug,
        Self::Extensions,
        Self::InternalPage,
        Self::AppPage,
        Self::Web,
    ];

    const fn is_internal(self) -> bool {
        matches!(
            self,
            Self::MainUi | Self::PopupUi | Self::OmniboxUi | Self::InternalPage
        )
    }

    const fn is_app(self) -> bool {
        matches!(
            self,
            Self::NewTab | Self::OmniboxDebug | Self::Extensions | Self::AppPage
        )
    }

    const fn is_browser_ui(self) -> bool {
        matches!(self, Self::MainUi | Self::PopupUi)
    }

    const fn is_omnibox(self) -> bool {
        matches!(self, Self::OmniboxUi | Self::NewTab | Self::OmniboxDebug)
    }

    /// Whether this surface satisfies a permission class.
    #[must_use]
    pub const fn satisfies(self, class: PermissionClass) -> bool {
        match class {
            PermissionClass::All => true,
            PermissionClass::PrivilegedApp | PermissionClass::SettingsScoped => {
                self.is_internal() || self.is_app()
            }
            PermissionClass::PrivilegedBrowserUi => self.is_browser_ui() || self.is_omnibox(),
            PermissionClass::SessionScoped => {
                self.is_internal() || self.is_omnibox() || self.is_browser_ui()
            }
        }
    }

    /// Classes this surface satisfies.
    pub fn grants(self) -> impl Iterator<Item = PermissionClass> {
        PermissionClass::ALL
            .into_iter()
            .filter(move |class| self.satisfies(*class))
    }
}

/// Classify an origin. Total and side-effect free.
#[must_use]
pub fn classify_origin(origin: &Origin) -> Surface {
    if let Some((_, _, surface)) = LOCATION_RULES
        .iter()
        .find(|(protocol, host, _)| origin.is_location(protocol, host))
    {
        return *surface;
    }
    if origin.is_protocol(INTERNAL_PROTOCOL) {
        Surface::InternalPage
    } else if origin.is_protocol(APP_PROTOCOL) {
        Surface::AppPage
    } else {
        Surface::Web
    }
}

/// Classify the context that issued a call.
#[must_use]
pub fn classify_context(context: &ExecutionContext) -> Surface {
    classify_origin(context.origin())
}
