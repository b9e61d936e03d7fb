// src/features.rs
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeatureId {
    ViewUnlimited,
    View50,
    View25,
    View10,
    View5,
    MessageUnlimited,
    Message50,
    Message25,
    Message10,
    Message5,
    FavoritesUnlimited,
    Favorites50,
    Favorites25,
    Favorites10,
    Favorites5,
    AdvancedFilter,
    PositionFilter,
    VideoAccess,
    ContactInfo,
    DetailedStats,
    PrioritySupport,
    FeaturedBadge,
}

impl FeatureId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureId::ViewUnlimited => "view_unlimited",
            FeatureId::View50 => "view_50",
            FeatureId::View25 => "view_25",
            FeatureId::View10 => "view_10",
            FeatureId::View5 => "view_5",
            FeatureId::MessageUnlimited => "message_unlimited",
            FeatureId::Message50 => "message_50",
            FeatureId::Message25 => "message_25",
            FeatureId::Message10 => "message_10",
            FeatureId::Message5 => "message_5",
            FeatureId::FavoritesUnlimited => "favorites_unlimited",
            FeatureId::Favorites50 => "favorites_50",
            FeatureId::Favorites25 => "favorites_25",
            FeatureId::Favorites10 => "favorites_10",
            FeatureId::Favorites5 => "favorites_5",
            FeatureId::AdvancedFilter => "advanced_filter",
            FeatureId::PositionFilter => "position_filter",
            FeatureId::VideoAccess => "video_access",
            FeatureId::ContactInfo => "contact_info",
            FeatureId::DetailedStats => "detailed_stats",
            FeatureId::PrioritySupport => "priority_support",
            FeatureId::FeaturedBadge => "featured_badge",
        }
    }

    /// Текст метки, как его вводит администратор в списке возможностей плана.
    pub fn label(&self) -> &'static str {
        match self {
            FeatureId::ViewUnlimited => "مشاهدة غير محدودة للاعبين",
            FeatureId::View50 => "مشاهدة 50 لاعب",
            FeatureId::View25 => "مشاهدة 25 لاعب",
            FeatureId::View10 => "مشاهدة 10 لاعبين",
            FeatureId::View5 => "مشاهدة 5 لاعبين",
            FeatureId::MessageUnlimited => "رسائل غير محدودة",
            FeatureId::Message50 => "50 رسالة شهرياً",
            FeatureId::Message25 => "25 رسالة شهرياً",
            FeatureId::Message10 => "10 رسائل شهرياً",
            FeatureId::Message5 => "5 رسائل شهرياً",
            FeatureId::FavoritesUnlimited => "قائمة مفضلة غير محدودة",
            FeatureId::Favorites50 => "حفظ 50 لاعب في المفضلة",
            FeatureId::Favorites25 => "حفظ 25 لاعب في المفضلة",
            FeatureId::Favorites10 => "حفظ 10 لاعبين في المفضلة",
            FeatureId::Favorites5 => "حفظ 5 لاعبين في المفضلة",
            FeatureId::AdvancedFilter => "الفلترة المتقدمة",
            FeatureId::PositionFilter => "الفلترة حسب المركز",
            FeatureId::VideoAccess => "مشاهدة فيديوهات اللاعبين",
            FeatureId::ContactInfo => "بيانات التواصل المباشر",
            FeatureId::DetailedStats => "إحصائيات مفصلة",
            FeatureId::PrioritySupport => "دعم فني بأولوية",
            FeatureId::FeaturedBadge => "شارة النادي المميز",
        }
    }
}

// Порядок важен: от самого щедрого уровня к самому скромному
const VIEW_TIERS: [(FeatureId, Quota); 5] = [
    (FeatureId::ViewUnlimited, Quota::Unlimited),
    (FeatureId::View50, Quota::Limited(50)),
    (FeatureId::View25, Quota::Limited(25)),
    (FeatureId::View10, Quota::Limited(10)),
    (FeatureId::View5, Quota::Limited(5)),
];

const MESSAGE_TIERS: [(FeatureId, Quota); 5] = [
    (FeatureId::MessageUnlimited, Quota::Unlimited),
    (FeatureId::Message50, Quota::Limited(50)),
    (FeatureId::Message25, Quota::Limited(25)),
    (FeatureId::Message10, Quota::Limited(10)),
    (FeatureId::Message5, Quota::Limited(5)),
];

const FAVORITE_TIERS: [(FeatureId, Quota); 5] = [
    (FeatureId::FavoritesUnlimited, Quota::Unlimited),
    (FeatureId::Favorites50, Quota::Limited(50)),
    (FeatureId::Favorites25, Quota::Limited(25)),
    (FeatureId::Favorites10, Quota::Limited(10)),
    (FeatureId::Favorites5, Quota::Limited(5)),
];

pub const DEFAULT_PLAYER_VIEWS: Quota = Quota::Limited(5);
pub const DEFAULT_MESSAGES: Quota = Quota::Limited(5);
pub const DEFAULT_FAVORITES: Quota = Quota::Limited(5);

/// Месячная квота. В JSON и в БД безлимит кодируется как `-1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Quota {
    Limited(u32),
    Unlimited,
}

impl Quota {
    pub const UNLIMITED_SENTINEL: i32 = -1;

    pub fn allows(&self, used: i32) -> bool {
        match self {
            Quota::Unlimited => true,
            Quota::Limited(limit) => i64::from(used) < i64::from(*limit),
        }
    }
}

impl From<i32> for Quota {
    fn from(value: i32) -> Self {
        if value < 0 {
            Quota::Unlimited
        } else {
            Quota::Limited(value as u32)
        }
    }
}

impl From<Quota> for i32 {
    fn from(quota: Quota) -> Self {
        match quota {
            Quota::Unlimited => Quota::UNLIMITED_SENTINEL,
            Quota::Limited(limit) => i32::try_from(limit).unwrap_or(i32::MAX),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLimits {
    pub player_views: Quota,
    pub messages: Quota,
    pub favorites: Quota,
    pub has_advanced_filter: bool,
    pub has_position_filter: bool,
    pub has_video_access: bool,
    pub has_contact_info: bool,
    pub has_detailed_stats: bool,
    pub has_priority_support: bool,
    pub has_featured_badge: bool,
}

impl Default for ResolvedLimits {
    fn default() -> Self {
        resolve_limits(&[])
    }
}

pub fn plan_has_feature(features: &[String], id: FeatureId) -> bool {
    let label = id.label();
    features
        .iter()
        .any(|feature| feature.trim() == id.as_str() || feature.contains(label))
}

fn resolve_tier(features: &[String], tiers: &[(FeatureId, Quota)], default: Quota) -> Quota {
    tiers
        .iter()
        .find(|(id, _)| plan_has_feature(features, *id))
        .map(|(_, quota)| *quota)
        .unwrap_or(default)
}

pub fn resolve_limits(features: &[String]) -> ResolvedLimits {
    let has_advanced_filter = plan_has_feature(features, FeatureId::AdvancedFilter);

    ResolvedLimits {
        player_views: resolve_tier(features, &VIEW_TIERS, DEFAULT_PLAYER_VIEWS),
        messages: resolve_tier(features, &MESSAGE_TIERS, DEFAULT_MESSAGES),
        favorites: resolve_tier(features, &FAVORITE_TIERS, DEFAULT_FAVORITES),
        has_advanced_filter,
        // Расширенная фильтрация включает фильтр по позиции
        has_position_filter: has_advanced_filter
            || plan_has_feature(features, FeatureId::PositionFilter),
        has_video_access: plan_has_feature(features, FeatureId::VideoAccess),
        has_contact_info: plan_has_feature(features, FeatureId::ContactInfo),
        has_detailed_stats: plan_has_feature(features, FeatureId::DetailedStats),
        has_priority_support: plan_has_feature(features, FeatureId::PrioritySupport),
        has_featured_badge: plan_has_feature(features, FeatureId::FeaturedBadge),
    }
}
