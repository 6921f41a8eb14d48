use std::ops::DerefMut;

use diesel::prelude::*;
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl;

use crate::models::ActionType;

use super::api_util::{new_unlocated_server_error, APIError, ERROR_DB_UNKNOWN};

pub struct CatalogQuest {
    pub title: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub ordinal: i32,
    pub action_url: &'static str,
    pub action_type: ActionType,
}

/// The static promotional catalog. Seeded at startup by upsert on `ordinal`,
/// so edits here propagate to the stored rows without duplicating them.
pub static QUESTS: [CatalogQuest; 4] = [
    CatalogQuest {
        title: "Follow us on X",
        description: "Follow the official account and like the pinned post.",
        icon: "bird",
        ordinal: 1,
        action_url: "https://x.com/questline_app",
        action_type: ActionType::Follow,
    },
    CatalogQuest {
        title: "Subscribe on YouTube",
        description: "Subscribe to the channel and watch the latest video.",
        icon: "play",
        ordinal: 2,
        action_url: "https://youtube.com/@questline_app",
        action_type: ActionType::Subscribe,
    },
    CatalogQuest {
        title: "Join the Telegram group",
        description: "Join the community group and say hello.",
        icon: "send",
        ordinal: 3,
        action_url: "https://t.me/questline_app",
        action_type: ActionType::Join,
    },
    CatalogQuest {
        title: "Invite a friend",
        description: "Share your referral code with a friend who registers.",
        icon: "users",
        ordinal: 4,
        action_url: "",
        action_type: ActionType::Referral,
    },
];

pub async fn seed_quests<C>(conn: &mut C) -> Result<(), APIError>
where
    C: DerefMut<Target = AsyncPgConnection> + std::marker::Send,
{
    use crate::schema::quests::dsl::*;

    for quest in QUESTS.iter() {
        diesel::insert_into(quests)
            .values((
                title.eq(quest.title),
                description.eq(quest.description),
                icon.eq(quest.icon),
                ordinal.eq(quest.ordinal),
                action_url.eq(quest.action_url),
                action_type.eq(quest.action_type.as_str()),
            ))
            .on_conflict(ordinal)
            .do_update()
            .set((
                title.eq(quest.title),
                description.eq(quest.description),
                icon.eq(quest.icon),
                action_url.eq(quest.action_url),
                action_type.eq(quest.action_type.as_str()),
            ))
            .execute(conn)
            .await
            .map_err(|e| new_unlocated_server_error(e, ERROR_DB_UNKNOWN))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ordinals_are_unique() {
        let ordinals: HashSet<i32> = QUESTS.iter().map(|q| q.ordinal).collect();
        assert_eq!(ordinals.len(), QUESTS.len());
    }

    #[test]
    fn exactly_one_referral_quest() {
        let referral = QUESTS
            .iter()
            .filter(|q| q.action_type == ActionType::Referral)
            .count();
        assert_eq!(referral, 1);
    }

    #[test]
    fn external_quests_carry_an_action_url() {
        for quest in QUESTS.iter() {
            if quest.action_type != ActionType::Referral {
                assert!(!quest.action_url.is_empty(), "{}", quest.title);
            }
        }
    }
}
