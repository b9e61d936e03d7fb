// src/gate.rs
//! Проверки "можно ли сейчас выполнить действие". Ничего не изменяют.
//! Окончательное решение принимает хранилище при списании (см. usage).

use crate::features::ResolvedLimits;
use crate::models::UsageCounter;

pub fn can_view_player(
    has_active_subscription: bool,
    usage: &UsageCounter,
    limits: &ResolvedLimits,
) -> bool {
    has_active_subscription && limits.player_views.allows(usage.player_views)
}

pub fn can_send_message(
    has_active_subscription: bool,
    usage: &UsageCounter,
    limits: &ResolvedLimits,
) -> bool {
    has_active_subscription && limits.messages.allows(usage.messages_sent)
}

pub fn can_add_favorite(
    has_active_subscription: bool,
    usage: &UsageCounter,
    limits: &ResolvedLimits,
) -> bool {
    has_active_subscription && limits.favorites.allows(usage.favorites_count)
}
