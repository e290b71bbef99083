use std::collections::HashMap;

pub struct I18n {
    translations: HashMap<String, HashMap<String, String>>,
    current_lang: String,
}

impl I18n {
    pub fn new(lang: &str) -> Self {
        let mut translations = HashMap::new();

        // English
        let mut en = HashMap::new();
        // Sync
        en.insert("sync_summary".to_string(), "Scanned {0} log files, indexed {1} new commands".to_string());
        en.insert("sync_problems".to_string(), "{0} problem(s) while indexing:".to_string());
        en.insert("sync_forced".to_string(), "Re-reading every log file from the start".to_string());

        // Results
        en.insert("no_records".to_string(), "No commands recorded yet".to_string());
        en.insert("no_matches".to_string(), "No commands match \"{0}\"".to_string());
        en.insert("showing_of".to_string(), "Showing {0} of {1}".to_string());
        en.insert("regex_fallback".to_string(), "Invalid regex, matched literally: {0}".to_string());
        en.insert("unknown".to_string(), "unknown".to_string());
        en.insert("status_ok".to_string(), "ok".to_string());
        en.insert("status_error".to_string(), "err".to_string());
        en.insert("runs".to_string(), "{0}×".to_string());

        // Stats
        en.insert("stats_commands".to_string(), "Commands:          {0}".to_string());
        en.insert("stats_distinct".to_string(), "Distinct commands: {0}".to_string());
        en.insert("stats_failed".to_string(), "Failed:            {0}".to_string());
        en.insert("stats_files".to_string(), "Indexed log files: {0}".to_string());
        en.insert("stats_fts".to_string(), "Full-text index:   {0}".to_string());
        en.insert("enabled".to_string(), "enabled".to_string());
        en.insert("disabled".to_string(), "disabled".to_string());

        // Errors
        en.insert("error_open_store".to_string(), "Failed to open history database {0}".to_string());
        en.insert("error_cwd".to_string(), "Cannot determine current directory".to_string());

        // Chinese
        let mut zh = HashMap::new();
        // Sync
        zh.insert("sync_summary".to_string(), "扫描了 {0} 个日志文件，新索引 {1} 条命令".to_string());
        zh.insert("sync_problems".to_string(), "索引过程中出现 {0} 个问题:".to_string());
        zh.insert("sync_forced".to_string(), "从头重新读取所有日志文件".to_string());

        // Results
        zh.insert("no_records".to_string(), "尚未记录任何命令".to_string());
        zh.insert("no_matches".to_string(), "没有匹配 \"{0}\" 的命令".to_string());
        zh.insert("showing_of".to_string(), "显示 {0} / {1}".to_string());
        zh.insert("regex_fallback".to_string(), "正则表达式无效，按字面匹配: {0}".to_string());
        zh.insert("unknown".to_string(), "未知".to_string());
        zh.insert("status_ok".to_string(), "成功".to_string());
        zh.insert("status_error".to_string(), "失败".to_string());
        zh.insert("runs".to_string(), "{0}次".to_string());

        // Stats
        zh.insert("stats_commands".to_string(), "命令总数:     {0}".to_string());
        zh.insert("stats_distinct".to_string(), "不同命令:     {0}".to_string());
        zh.insert("stats_failed".to_string(), "失败命令:     {0}".to_string());
        zh.insert("stats_files".to_string(), "已索引日志:   {0}".to_string());
        zh.insert("stats_fts".to_string(), "全文索引:     {0}".to_string());
        zh.insert("enabled".to_string(), "已启用".to_string());
        zh.insert("disabled".to_string(), "未启用".to_string());

        // Errors
        zh.insert("error_open_store".to_string(), "打开历史数据库失败 {0}".to_string());
        zh.insert("error_cwd".to_string(), "无法获取当前目录".to_string());

        translations.insert("en".to_string(), en);
        translations.insert("zh".to_string(), zh);

        let effective_lang = if lang.starts_with("zh") || lang == "cn" || lang == "chinese" {
            "zh"
        } else {
            "en"
        };

        Self {
            translations,
            current_lang: effective_lang.to_string(),
        }
    }

    pub fn t(&self, key: &str) -> String {
        if let Some(lang_map) = self.translations.get(&self.current_lang) {
            if let Some(value) = lang_map.get(key) {
                return value.clone();
            }
        }
        key.to_string()
    }

    pub fn t_format(&self, key: &str, args: &[&str]) -> String {
        let template = self.t(key);
        let mut result = template;
        for (i, arg) in args.iter().enumerate() {
            result = result.replace(&format!("{{{}}}", i), arg);
        }
        result
    }
}
