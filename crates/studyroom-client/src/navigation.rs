use std::fmt;
use std::sync::Mutex;

use tracing::info;

use studyroom_types::RoomCode;

/// Views the controller can move the user to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Login,
    Room(RoomCode),
    Summary(RoomCode),
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Home => f.write_str("/"),
            Self::Login => f.write_str("/login"),
            Self::Room(code) => write!(f, "/room/{}", code),
            Self::Summary(code) => write!(f, "/summary/{}", code),
        }
    }
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Navigator that keeps the visited routes in order.
#[derive(Debug, Default)]
pub struct RouteHistory {
    visited: Mutex<Vec<Route>>,
}

impl RouteHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Route {
        self.visited
            .lock()
            .ok()
            .and_then(|visited| visited.last().cloned())
            .unwrap_or(Route::Home)
    }

    pub fn visited(&self) -> Vec<Route> {
        self.visited
            .lock()
            .map(|visited| visited.clone())
            .unwrap_or_default()
    }
}

impl Navigator for RouteHistory {
    fn navigate(&self, route: Route) {
        info!("Navigating to {}", route);
        if let Ok(mut visited) = self.visited.lock() {
            visited.push(route);
        }
    }
}
