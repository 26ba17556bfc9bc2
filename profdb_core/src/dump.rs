//! Human-readable and JSON renderings of a profile

use crate::codec::PROFILE_VERSION;
use crate::error::Result;
use crate::file_data::FileProfileData;
use crate::inline_cache::SiteData;
use crate::profile::ProfileInfo;
use crate::types::DexFileInfo;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Text dump of a profile; indices are resolved to names where a live file
/// supplies them
pub struct ProfileDump<'a> {
    info: &'a ProfileInfo,
    live_by_key: HashMap<String, &'a DexFileInfo>,
}

impl<'a> ProfileDump<'a> {
    pub fn new(info: &'a ProfileInfo, live_files: &'a [DexFileInfo]) -> Self {
        Self {
            info,
            live_by_key: live_files
                .iter()
                .map(|live| (live.profile_key(), live))
                .collect(),
        }
    }

    fn live(&self, data: &FileProfileData) -> Option<&'a DexFileInfo> {
        self.live_by_key.get(data.profile_key()).copied()
    }

    fn write_method(
        &self,
        f: &mut fmt::Formatter<'_>,
        data: &FileProfileData,
        method_index: u16,
    ) -> fmt::Result {
        match self.live(data).and_then(|live| live.method_name(method_index)) {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{}", method_index),
        }
    }

    fn write_site(&self, f: &mut fmt::Formatter<'_>, site: &SiteData) -> fmt::Result {
        if site.is_missing_types() {
            return write!(f, "missing types");
        }
        if site.is_megamorphic() {
            return write!(f, "megamorphic");
        }
        let mut first = true;
        for class in site.classes() {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            let owner = self.info.file_data(class.dex_profile_index);
            let name = owner
                .and_then(|owner| self.live(owner))
                .and_then(|live| live.class_name(class.type_index));
            match (owner, name) {
                (_, Some(name)) => write!(f, "{}", name)?,
                (Some(owner), None) => write!(f, "{}:{}", owner.profile_key(), class.type_index)?,
                (None, None) => write!(f, "?{}:{}", class.dex_profile_index, class.type_index)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for ProfileDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ProfileInfo [{}]",
            String::from_utf8_lossy(&PROFILE_VERSION[..3])
        )?;
        for data in self.info.files() {
            writeln!(
                f,
                "{} [index={}] [checksum={:x}] [num_method_ids={}]",
                data.profile_key(),
                data.profile_index(),
                data.checksum(),
                data.num_method_ids()
            )?;

            write!(f, "\thot methods:")?;
            for (&method_index, caches) in data.hot_methods() {
                write!(f, " ")?;
                self.write_method(f, data, method_index)?;
                write!(f, "[")?;
                for (i, (dex_pc, site)) in caches.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{{{:#x}: ", dex_pc)?;
                    self.write_site(f, site)?;
                    write!(f, "}}")?;
                }
                write!(f, "]")?;
            }
            writeln!(f)?;

            for (label, methods) in [
                ("startup methods", data.startup_methods().collect::<Vec<_>>()),
                (
                    "post startup methods",
                    data.post_startup_methods().collect::<Vec<_>>(),
                ),
            ] {
                write!(f, "\t{}:", label)?;
                for method_index in methods {
                    write!(f, " ")?;
                    self.write_method(f, data, method_index)?;
                }
                writeln!(f)?;
            }

            write!(f, "\tclasses:")?;
            let live = self.live(data);
            for &type_index in data.classes() {
                match live.and_then(|live| live.class_name(type_index)) {
                    Some(name) => write!(f, " {}", name)?,
                    None => write!(f, " {}", type_index)?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Render `info` as text, resolving names through `live_files`
pub fn dump_info(info: &ProfileInfo, live_files: &[DexFileInfo]) -> String {
    ProfileDump::new(info, live_files).to_string()
}

#[derive(Debug, Serialize)]
struct ProfileSummary {
    version: String,
    files: Vec<FileSummary>,
}

#[derive(Debug, Serialize)]
struct FileSummary {
    profile_key: String,
    profile_index: u8,
    checksum: u32,
    num_method_ids: u32,
    hot_methods: Vec<MethodSummary>,
    startup_methods: Vec<u16>,
    post_startup_methods: Vec<u16>,
    classes: Vec<u16>,
}

#[derive(Debug, Serialize)]
struct MethodSummary {
    method_index: u16,
    inline_caches: Vec<SiteSummary>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum SiteSummary {
    Classes {
        dex_pc: u16,
        classes: Vec<ClassSummary>,
    },
    Megamorphic {
        dex_pc: u16,
    },
    MissingTypes {
        dex_pc: u16,
    },
}

#[derive(Debug, Serialize)]
struct ClassSummary {
    profile_key: String,
    type_index: u16,
}

/// Machine-readable summary for tooling
pub fn to_json(info: &ProfileInfo) -> Result<String> {
    let summary = ProfileSummary {
        version: String::from_utf8_lossy(&PROFILE_VERSION[..3]).into_owned(),
        files: info
            .files()
            .map(|data| FileSummary {
                profile_key: data.profile_key().to_string(),
                profile_index: data.profile_index(),
                checksum: data.checksum(),
                num_method_ids: data.num_method_ids(),
                hot_methods: data
                    .hot_methods()
                    .iter()
                    .map(|(&method_index, caches)| MethodSummary {
                        method_index,
                        inline_caches: caches
                            .iter()
                            .map(|(&dex_pc, site)| summarize_site(info, dex_pc, site))
                            .collect(),
                    })
                    .collect(),
                startup_methods: data.startup_methods().collect(),
                post_startup_methods: data.post_startup_methods().collect(),
                classes: data.classes().iter().copied().collect(),
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&summary)?)
}

fn summarize_site(info: &ProfileInfo, dex_pc: u16, site: &SiteData) -> SiteSummary {
    if site.is_missing_types() {
        return SiteSummary::MissingTypes { dex_pc };
    }
    if site.is_megamorphic() {
        return SiteSummary::Megamorphic { dex_pc };
    }
    SiteSummary::Classes {
        dex_pc,
        classes: site
            .classes()
            .iter()
            .map(|class| ClassSummary {
                profile_key: info
                    .file_data(class.dex_profile_index)
                    .map(|owner| owner.profile_key().to_string())
                    .unwrap_or_default(),
                type_index: class.type_index,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DexFileKey, MethodFlags, ProfileInlineCache, ProfileMethodInfo, TypeReference};

    fn profile() -> ProfileInfo {
        let key = DexFileKey::new("a.dex", 0x2a, 4);
        let mut info = ProfileInfo::new();
        info.add_method(
            &ProfileMethodInfo::with_inline_caches(
                key.clone(),
                1,
                vec![
                    ProfileInlineCache::new(0x3, vec![TypeReference::new(key.clone(), 0)]),
                    ProfileInlineCache::missing_types(0x9),
                ],
            ),
            MethodFlags::HOT | MethodFlags::STARTUP,
        )
        .unwrap();
        info.add_class_for_dex(&key, 0).unwrap();
        info
    }

    #[test]
    fn test_dump_with_indices() {
        let text = dump_info(&profile(), &[]);
        assert!(text.starts_with("ProfileInfo [010]\n"));
        assert!(text.contains("a.dex [index=0] [checksum=2a] [num_method_ids=4]"));
        assert!(text.contains("\thot methods: 1[{0x3: a.dex:0} {0x9: missing types}]"));
        assert!(text.contains("\tstartup methods: 1\n"));
        assert!(text.contains("\tclasses: 0\n"));
    }

    #[test]
    fn test_dump_resolves_names() {
        let mut live = DexFileInfo::new("/data/a.dex", 0x2a, 4, 1);
        live.class_names = vec!["LFoo;".to_string()];
        live.method_names = vec![
            "Foo.<init>".to_string(),
            "Foo.run".to_string(),
        ];
        let text = dump_info(&profile(), &[live]);
        assert!(text.contains("\thot methods: Foo.run[{0x3: LFoo;}"));
        assert!(text.contains("\tclasses: LFoo;\n"));
    }

    #[test]
    fn test_json_summary() {
        let json = to_json(&profile()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let file = &value["files"][0];
        assert_eq!(file["profile_key"], "a.dex");
        assert_eq!(file["hot_methods"][0]["inline_caches"][1]["state"], "missing_types");
        assert_eq!(
            file["hot_methods"][0]["inline_caches"][0]["classes"][0]["type_index"],
            0
        );
    }
}
