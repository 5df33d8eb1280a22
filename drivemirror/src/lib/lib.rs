#![allow(async_fn_in_trait)]

use futures::{future, Future};

pub mod error;
pub mod oauth2;
pub mod session;
pub mod storage;

pub mod uri {
    #[derive(Debug)]
    pub struct QueryMap<'a>(Vec<(&'a str, &'a str)>);

    impl<'a> QueryMap<'a> {
        pub fn parse(query: Option<&'a str>) -> QueryMap<'a> {
            let mut vec = Vec::new();
            if let Some(query) = query {
                for part in query.split('&').filter(|p| !p.is_empty()) {
                    let (name, value) = part.split_once('=').unwrap_or((part, ""));
                    vec.push((name, value));
                }
            }
            QueryMap(vec)
        }

        pub fn get(&self, key: &str) -> Option<&'a str> {
            self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
        }
    }

    #[test]
    fn test_query_map() {
        let query = QueryMap::parse(Some("state=abc&code=4/0AbC&scope=drive&flag"));
        assert_eq!(query.get("state"), Some("abc"));
        assert_eq!(query.get("code"), Some("4/0AbC"));
        assert_eq!(query.get("flag"), Some(""));
        assert_eq!(query.get("error"), None);
        assert_eq!(QueryMap::parse(None).get("code"), None);
    }
}

/// Something holding state worth saving before the program exits
pub trait PersistCache {
    fn persist_cache(&self) -> impl Future<Output = anyhow::Result<()>> + Send {
        future::ready(Ok(()))
    }
}
