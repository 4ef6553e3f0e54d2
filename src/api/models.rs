//! Music service API response models

use serde::{Deserialize, Serialize};

use crate::quality::QualityTier;

/// Performer reference attached to songs and albums.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Singer {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub mid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
}

impl Singer {
    /// Display name; the service fills `title` with the formatted form.
    pub fn display_name(&self) -> &str {
        if self.title.is_empty() {
            &self.name
        } else {
            &self.title
        }
    }
}

/// Album reference attached to songs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlbumRef {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub mid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    /// Alternate picture mid; some albums publish covers under it.
    #[serde(default)]
    pub pmid: String,
}

/// One song as returned by the resolution endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    #[serde(default)]
    pub id: u64,
    pub mid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub singer: Vec<Singer>,
    #[serde(default)]
    pub album: AlbumRef,
    /// Duration in seconds.
    #[serde(default)]
    pub interval: u32,
}

impl Song {
    /// Joined singer names, `&`-separated.
    pub fn singers_to_string(&self) -> String {
        self.singer
            .iter()
            .map(Singer::display_name)
            .collect::<Vec<_>>()
            .join("&")
    }

    /// `Title - Artist` form used for filenames and log lines.
    pub fn full_name(&self) -> String {
        let title = if self.title.is_empty() {
            &self.name
        } else {
            &self.title
        };
        let singers = self.singers_to_string();
        if singers.is_empty() {
            title.to_string()
        } else {
            format!("{title} - {singers}")
        }
    }
}

/// A playable URL negotiated for one song at one quality tier.
#[derive(Debug, Clone)]
pub struct SongUrl {
    pub mid: String,
    /// Absent when the tier is not available for this song/account.
    pub url: Option<String>,
    pub tier: QualityTier,
}

/// Descriptive tags fetched for embedding.
#[derive(Debug, Clone, Default)]
pub struct SongMetadata {
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub album_artists: Vec<String>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub genre: Option<String>,
    pub company: Option<String>,
    /// Release date, `YYYY-MM-DD` or just the year.
    pub release_date: Option<String>,
}

/// Lyric payload; any of the variants may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Lyric {
    #[serde(default)]
    pub lyric: String,
    #[serde(default)]
    pub trans: String,
    #[serde(default)]
    pub roma: String,
}

impl Lyric {
    /// Merge the requested variants into one embeddable text.
    pub fn merged(&self, with_trans: bool, with_roma: bool) -> Option<String> {
        if self.lyric.is_empty() {
            return None;
        }
        let mut text = self.lyric.clone();
        if with_trans && !self.trans.is_empty() {
            text.push_str("\n\n");
            text.push_str(&self.trans);
        }
        if with_roma && !self.roma.is_empty() {
            text.push_str("\n\n");
            text.push_str(&self.roma);
        }
        Some(text)
    }
}

/// Cover art URL for a song, preferring the album image over the artist
/// portrait, per the service's photo CDN layout.
pub fn cover_url(song: &Song) -> Option<String> {
    let pic_id = if !song.album.mid.is_empty() {
        format!("T002R500x500M000{}", song.album.mid)
    } else if !song.album.pmid.is_empty() {
        format!("T062R500x500M000{}", song.album.pmid)
    } else if let Some(singer) = song.singer.first().filter(|s| !s.mid.is_empty()) {
        format!("T001R500x500M000{}", singer.mid)
    } else {
        return None;
    };
    Some(format!("https://y.gtimg.cn/music/photo_new/{pic_id}.jpg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song_with(album_mid: &str, pmid: &str, singer_mid: &str) -> Song {
        Song {
            id: 1,
            mid: "songmid".into(),
            name: "Name".into(),
            title: "Title".into(),
            singer: vec![Singer {
                id: 2,
                mid: singer_mid.into(),
                name: "Artist".into(),
                title: "Artist".into(),
            }],
            album: AlbumRef {
                mid: album_mid.into(),
                pmid: pmid.into(),
                ..Default::default()
            },
            interval: 180,
        }
    }

    #[test]
    fn test_full_name_joins_singers() {
        let mut song = song_with("", "", "");
        song.singer.push(Singer {
            id: 3,
            mid: String::new(),
            name: "Second".into(),
            title: "Second".into(),
        });
        assert_eq!(song.full_name(), "Title - Artist&Second");
    }

    #[test]
    fn test_cover_url_prefers_album() {
        let song = song_with("albummid", "picmid", "singermid");
        assert!(cover_url(&song).unwrap().contains("T002R500x500M000albummid"));

        let song = song_with("", "picmid", "singermid");
        assert!(cover_url(&song).unwrap().contains("T062R500x500M000picmid"));

        let song = song_with("", "", "singermid");
        assert!(cover_url(&song).unwrap().contains("T001R500x500M000singermid"));

        let song = song_with("", "", "");
        assert!(cover_url(&song).is_none());
    }

    #[test]
    fn test_lyric_merge_variants() {
        let lyric = Lyric {
            lyric: "base".into(),
            trans: "translated".into(),
            roma: String::new(),
        };
        assert_eq!(lyric.merged(false, false).unwrap(), "base");
        assert!(lyric.merged(true, true).unwrap().contains("translated"));

        let empty = Lyric::default();
        assert!(empty.merged(true, true).is_none());
    }
}
