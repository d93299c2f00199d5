//! Author-side numbers, all derived on the client from the post mirror and
//! never persisted.

use crate::entities::Post;

const WORDS_PER_MINUTE: u64 = 200;

/// The one feed scoring rule: raw views plus five per like.
pub fn trending_score(post: &Post) -> u64 { post.views + post.likes.len() as u64 * 5 }

pub fn word_count(text: &str) -> u64 { text.split_whitespace().count() as u64 }

/// Estimated read time in whole minutes, rounded up.
pub fn read_time_minutes(words: u64) -> u64 { (words + WORDS_PER_MINUTE - 1) / WORDS_PER_MINUTE }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthorStats {
    pub posts: u64,
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
    pub reposts: u64,
    pub read_minutes: u64,
}

impl AuthorStats {
    pub fn collect<'a>(posts: impl IntoIterator<Item = &'a Post>) -> Self {
        let mut stats = Self::default();

        for post in posts {
            stats.posts += 1;
            stats.views += post.views;
            stats.likes += post.likes.len() as u64;
            stats.comments += post.comments.len() as u64;
            stats.reposts += post.reposts.len() as u64;
            stats.read_minutes += read_time_minutes(word_count(&post.body));
        }

        stats
    }
}

/// Reputation ladder shown on the profile page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    Rookie,
    RisingStar,
    Influencer,
    Legend,
}

impl Rank {
    pub fn for_likes(total_likes: u64) -> Self {
        match total_likes {
            0..=5 => Rank::Rookie,
            6..=20 => Rank::RisingStar,
            21..=50 => Rank::Influencer,
            _ => Rank::Legend,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Utc;

    use super::*;
    use crate::entities::{Author, PostId, PostStatus, UserId};

    fn post(views: u64, likes: usize, body: &str) -> Post {
        Post {
            id: PostId::generate(),
            author: Author {
                id: UserId::from("a"),
                name: "A".to_string(),
                username: "a".to_string(),
            },
            title: "t".to_string(),
            body: body.to_string(),
            category: "General".to_string(),
            created: Utc::now(),
            likes: (0..likes)
                .map(|i| UserId::from(format!("u{}", i)))
                .collect::<HashSet<_>>(),
            reposts: Default::default(),
            saved_by: Default::default(),
            comments: vec![],
            views,
            edited: false,
            status: PostStatus::Published,
        }
    }

    #[test]
    fn trending_score_weighs_likes_five_to_one() {
        assert_eq!(trending_score(&post(10, 0, "")), 10);
        assert_eq!(trending_score(&post(0, 3, "")), 15);
        assert_eq!(trending_score(&post(5, 1, "")), 10);
    }

    #[test]
    fn read_time_rounds_up() {
        assert_eq!(read_time_minutes(0), 0);
        assert_eq!(read_time_minutes(1), 1);
        assert_eq!(read_time_minutes(200), 1);
        assert_eq!(read_time_minutes(201), 2);
        assert_eq!(word_count("  one  two\nthree "), 3);
    }

    #[test]
    fn stats_aggregate_across_posts() {
        let posts = [post(10, 2, "a b c"), post(5, 0, "one two")];
        let stats = AuthorStats::collect(posts.iter());

        assert_eq!(stats.posts, 2);
        assert_eq!(stats.views, 15);
        assert_eq!(stats.likes, 2);
        assert_eq!(stats.read_minutes, 2);
    }

    #[test]
    fn rank_thresholds() {
        assert_eq!(Rank::for_likes(0), Rank::Rookie);
        assert_eq!(Rank::for_likes(5), Rank::Rookie);
        assert_eq!(Rank::for_likes(6), Rank::RisingStar);
        assert_eq!(Rank::for_likes(21), Rank::Influencer);
        assert_eq!(Rank::for_likes(51), Rank::Legend);
    }
}
