//! The SQL issued against monitored servers. Queries with a runtime predicate
//! carry a `$1` marker that callers substitute before execution.

pub mod mysql {
    pub const STATUS: &str = "SHOW GLOBAL STATUS";
    pub const VARIABLES: &str = "SHOW GLOBAL VARIABLES";
    pub const SHOW_MASTER_STATUS: &str = "SHOW MASTER STATUS";
    pub const SHOW_BINARY_LOG_STATUS: &str = "SHOW BINARY LOG STATUS";
    pub const SHOW_SLAVE_STATUS: &str = "SHOW SLAVE STATUS";
    pub const SHOW_REPLICA_STATUS: &str = "SHOW REPLICA STATUS";
    pub const SHOW_REPLICAS: &str = "SHOW REPLICAS";
    pub const SHOW_SLAVE_HOSTS: &str = "SHOW SLAVE HOSTS";

    pub const INNODB_METRICS: &str = r#"
        SELECT
            NAME,
            COUNT
        FROM
            information_schema.INNODB_METRICS
        WHERE
            name IN ('adaptive_hash_searches', 'adaptive_hash_searches_btree', 'trx_rseg_history_len')
    "#;

    /// Checkpoint age fallback for 8.x servers that dropped the status counter.
    pub const CHECKPOINT_AGE: &str = r#"
        SELECT
            STORAGE_ENGINES ->> '$."InnoDB"."LSN"' - STORAGE_ENGINES ->> '$."InnoDB"."LSN_checkpoint"' AS checkpoint_age
        FROM
            performance_schema.log_status
    "#;

    pub const ACTIVE_REDO_LOGS: &str = r#"
        SELECT
            COUNT(*) AS count
        FROM
            performance_schema.file_instances
        WHERE
            file_name LIKE '%innodb_redo/%' AND
            file_name NOT LIKE '%_tmp'
    "#;

    pub const PS_DISK_IO: &str = r#"
        SELECT
            CONVERT(SUM(SUM_NUMBER_OF_BYTES_READ), UNSIGNED) AS io_read,
            CONVERT(SUM(SUM_NUMBER_OF_BYTES_WRITE), UNSIGNED) AS io_write
        FROM
            `performance_schema`.`file_summary_by_event_name`
        WHERE
            `performance_schema`.`file_summary_by_event_name`.`EVENT_NAME` LIKE 'wait/io/file/%' AND
            `performance_schema`.`file_summary_by_event_name`.`COUNT_STAR` > 0
    "#;

    pub const PS_PROCESSLIST: &str = r#"
        SELECT
            processlist_id          AS id,
            thread_id               AS mysql_thread_id,
            processlist_user        AS user,
            processlist_host        AS host,
            processlist_db          AS db,
            processlist_command     AS command,
            processlist_time        AS time,
            processlist_info        AS query,
            processlist_state       AS state,
            trx_state               AS trx_state,
            trx_operation_state     AS trx_operation_state,
            trx_rows_locked         AS trx_rows_locked,
            trx_rows_modified       AS trx_rows_modified,
            trx_concurrency_tickets AS trx_concurrency_tickets,
            connection_type         AS connection_type,
            TIMESTAMPDIFF(SECOND, trx_started, NOW()) AS trx_time
        FROM
            performance_schema.threads t
            LEFT JOIN information_schema.innodb_trx tx ON trx_mysql_thread_id = t.processlist_id
        WHERE
            processlist_id IS NOT NULL AND
            processlist_time IS NOT NULL AND
            processlist_command != 'Daemon'
            $1
    "#;

    pub const PL_PROCESSLIST: &str = r#"
        SELECT
            id,
            User                    AS user,
            Host                    AS host,
            db                      AS db,
            Command                 AS command,
            Time                    AS time,
            Info                    AS query,
            State                   AS state,
            trx_state               AS trx_state,
            trx_operation_state     AS trx_operation_state,
            trx_rows_locked         AS trx_rows_locked,
            trx_rows_modified       AS trx_rows_modified,
            trx_concurrency_tickets AS trx_concurrency_tickets,
            ''                      AS connection_type,
            TIMESTAMPDIFF(SECOND, trx_started, NOW()) AS trx_time
        FROM
            information_schema.PROCESSLIST pl
            LEFT JOIN information_schema.innodb_trx ON trx_mysql_thread_id = pl.Id
        WHERE
            command != 'Daemon'
            $1
    "#;

    pub const PS_FIND_REPLICAS: &str = r#"
        SELECT
            t.THREAD_ID AS id,
            t.PROCESSLIST_USER AS user,
            t.PROCESSLIST_HOST AS host,
            CONVERT (
                CAST( CONVERT ( uvt.VARIABLE_VALUE USING latin1 ) AS BINARY ) USING utf8
            ) AS replica_uuid
        FROM
            `performance_schema`.threads AS t JOIN
            `performance_schema`.user_variables_by_thread AS uvt ON t.THREAD_ID = uvt.THREAD_ID
        WHERE
            t.PROCESSLIST_COMMAND LIKE 'Binlog Dump%'
            AND uvt.VARIABLE_NAME = 'slave_uuid'
    "#;

    /// MariaDB has no user_variables_by_thread, so replica uuid cannot be
    /// resolved there.
    pub const MARIADB_FIND_REPLICAS: &str = r#"
        SELECT
            t.THREAD_ID AS id,
            t.PROCESSLIST_USER AS user,
            t.PROCESSLIST_HOST AS host
        FROM
            `performance_schema`.threads AS t
        WHERE
            t.PROCESSLIST_COMMAND LIKE 'Binlog Dump%'
    "#;

    pub const PL_FIND_REPLICAS: &str = r#"
        SELECT
            Id   AS id,
            User AS user,
            Host AS host,
            '' AS replica_uuid
        FROM
            information_schema.PROCESSLIST
        WHERE
            Command Like 'Binlog Dump%'
    "#;

    pub const HEARTBEAT_REPLICA_LAG: &str = r#"
        SELECT
            TIMESTAMPDIFF(SECOND, MAX(ts), NOW()) AS Seconds_Behind_Master
        FROM
            $1
    "#;

    pub const METADATA_LOCKS: &str = r#"
        SELECT
            OBJECT_INSTANCE_BEGIN AS id,
            OBJECT_TYPE,
            OBJECT_SCHEMA AS OBJECT_SCHEMA,
            GROUP_CONCAT(OBJECT_NAME ORDER BY OBJECT_NAME) AS OBJECT_NAME,
            LOCK_TYPE,
            LOCK_STATUS,
            SOURCE AS CODE_SOURCE,
            NAME AS THREAD_SOURCE,
            PROCESSLIST_ID AS PROCESSLIST_ID,
            PROCESSLIST_USER AS PROCESSLIST_USER,
            PROCESSLIST_TIME AS PROCESSLIST_TIME,
            PROCESSLIST_INFO AS PROCESSLIST_INFO
        FROM
            `performance_schema`.`metadata_locks` mlb JOIN
            `performance_schema`.`threads` t ON mlb.OWNER_THREAD_ID = t.THREAD_ID
        WHERE
            NOT (
                OBJECT_TYPE = 'TABLE' AND
                LOCK_STATUS = 'GRANTED' AND
                LOCK_TYPE LIKE 'SHARED%' AND
                PROCESSLIST_TIME <= 2
            ) AND
            OBJECT_TYPE != 'COLUMN STATISTICS'
        GROUP BY
            THREAD_ID,
            OBJECT_TYPE,
            LOCK_TYPE,
            LOCK_STATUS
    "#;

    pub const DDLS: &str = r#"
        SELECT
            t.processlist_id,
            stmt.sql_text AS sql_text,
            stage.event_name AS state,
            CONCAT(ROUND(100 * stage.work_completed / stage.work_estimated, 2), "%") AS percentage_completed,
            stmt.timer_wait AS started_ago,
            CONVERT(stmt.timer_wait / ROUND(100 * stage.work_completed / stage.work_estimated, 2) * 100,
                UNSIGNED) AS estimated_full_time,
            CONVERT((stmt.timer_wait / ROUND(100 * stage.work_completed / stage.work_estimated, 2) * 100)
                - stmt.timer_wait, UNSIGNED) AS estimated_remaining_time,
            CONVERT(SUM(`mt`.`CURRENT_NUMBER_OF_BYTES_USED`), UNSIGNED) AS memory
        FROM
            `performance_schema`.`events_statements_current` stmt JOIN
            `performance_schema`.`events_stages_current` stage ON stage.nesting_event_id = stmt.event_id JOIN
            `performance_schema`.`memory_summary_by_thread_by_event_name` `mt` ON `mt`.thread_id = stmt.thread_id JOIN
            `performance_schema`.`threads` t ON t.thread_id = stmt.thread_id
        WHERE
            stage.event_name LIKE 'stage/innodb/alter%'
        GROUP BY
            t.processlist_id
    "#;

    pub const FILE_SUMMARY_BY_INSTANCE: &str = r#"
        SELECT
            FILE_NAME,
            COUNT_READ,
            COUNT_WRITE,
            SUM_NUMBER_OF_BYTES_READ,
            SUM_NUMBER_OF_BYTES_WRITE,
            SUM_TIMER_WAIT
        FROM
            `performance_schema`.`file_summary_by_instance`
    "#;

    pub const TABLE_IO_WAITS_SUMMARY_BY_TABLE: &str = r#"
        SELECT
            OBJECT_SCHEMA,
            OBJECT_NAME AS OBJECT_TABLE,
            COUNT_FETCH,
            COUNT_INSERT,
            COUNT_UPDATE,
            COUNT_DELETE,
            SUM_TIMER_FETCH,
            SUM_TIMER_INSERT,
            SUM_TIMER_UPDATE,
            SUM_TIMER_DELETE
        FROM
            `performance_schema`.`table_io_waits_summary_by_table`
        WHERE
            OBJECT_SCHEMA NOT IN ('mysql', 'performance_schema', 'sys')
    "#;

    pub const STATEMENTS_SUMMARY_BY_DIGEST_80: &str = r#"
        SELECT
            DIGEST AS digest,
            DIGEST_TEXT AS digest_text,
            QUERY_SAMPLE_TEXT AS query_sample_text,
            SCHEMA_NAME AS schema_name,
            SUM_NO_GOOD_INDEX_USED AS sum_no_good_index_used,
            SUM_NO_INDEX_USED AS sum_no_index_used,
            COUNT_STAR AS count_star,
            SUM_ERRORS AS sum_errors,
            SUM_WARNINGS AS sum_warnings,
            SUM_TIMER_WAIT AS sum_timer_wait,
            SUM_LOCK_TIME AS sum_lock_time,
            SUM_CPU_TIME AS sum_cpu_time,
            SUM_ROWS_SENT AS sum_rows_sent,
            SUM_ROWS_EXAMINED AS sum_rows_examined,
            SUM_ROWS_AFFECTED AS sum_rows_affected
        FROM
            `performance_schema`.`events_statements_summary_by_digest`
        WHERE
            SCHEMA_NAME IS NOT NULL
    "#;

    pub const STATEMENTS_SUMMARY_BY_DIGEST: &str = r#"
        SELECT
            DIGEST AS digest,
            DIGEST_TEXT AS digest_text,
            '' AS query_sample_text,
            SCHEMA_NAME AS schema_name,
            SUM_NO_GOOD_INDEX_USED AS sum_no_good_index_used,
            SUM_NO_INDEX_USED AS sum_no_index_used,
            COUNT_STAR AS count_star,
            SUM_ERRORS AS sum_errors,
            SUM_WARNINGS AS sum_warnings,
            SUM_TIMER_WAIT AS sum_timer_wait,
            SUM_LOCK_TIME AS sum_lock_time,
            0 AS sum_cpu_time,
            SUM_ROWS_SENT AS sum_rows_sent,
            SUM_ROWS_EXAMINED AS sum_rows_examined,
            SUM_ROWS_AFFECTED AS sum_rows_affected
        FROM
            `performance_schema`.`events_statements_summary_by_digest`
        WHERE
            SCHEMA_NAME IS NOT NULL
    "#;

    pub const REPLICATION_APPLIER_STATUS: &str = r#"
        SELECT
            worker_id,
            ANY_VALUE(FORMAT_PICO_TIME(
                (applier_status.LAST_APPLIED_TRANSACTION_END_APPLY_TIMESTAMP -
                applier_status.LAST_APPLIED_TRANSACTION_START_APPLY_TIMESTAMP) * 1000000000000
            )) AS apply_time,
            ANY_VALUE(applier_status.LAST_APPLIED_TRANSACTION) AS last_applied_transaction,
            CONVERT(SUM(thread_events.COUNT_STAR), UNSIGNED) AS total_thread_events
        FROM
            `performance_schema`.replication_applier_status_by_worker applier_status JOIN
            `performance_schema`.events_transactions_summary_by_thread_by_event_name thread_events USING (THREAD_ID)
        WHERE
            applier_status.THREAD_ID IN (
                SELECT THREAD_ID FROM `performance_schema`.replication_applier_status_by_worker
            )
        GROUP BY
            worker_id
        WITH ROLLUP
        ORDER BY
            worker_id
    "#;

    pub const GROUP_REPLICATION_MEMBERS: &str = r#"
        SELECT
            *
        FROM
            performance_schema.replication_group_members LEFT JOIN
            performance_schema.replication_group_member_stats USING(MEMBER_ID)
    "#;

    pub const GROUP_REPLICATION_WRITE_CONCURRENCY: &str =
        "SELECT group_replication_get_write_concurrency() write_concurrency";

    pub const DETERMINE_CLUSTER_TYPE_8: &str = r#"
        SELECT
            cluster_type
        FROM
            mysql_innodb_cluster_metadata.clusters
            JOIN mysql_innodb_cluster_metadata.instances USING ( cluster_id )
        WHERE
            mysql_server_uuid = @@server_uuid
    "#;

    pub const INNODB_STATUS: &str = "SHOW ENGINE INNODB STATUS";

    pub const DATABASES: &str = r#"
        SELECT
            SCHEMA_NAME
        FROM
            information_schema.SCHEMATA
        ORDER BY
            SCHEMA_NAME
    "#;

    pub const PS_USER_STATISTICS: &str = r#"
        SELECT
            u.user AS user,
            total_connections AS total_connections,
            current_connections AS current_connections,
            CONVERT(SUM(sum_rows_affected), UNSIGNED) AS rows_affected,
            CONVERT(SUM(sum_rows_sent), UNSIGNED) AS rows_sent,
            CONVERT(SUM(sum_rows_examined), UNSIGNED) AS rows_examined,
            CONVERT(SUM(sum_created_tmp_disk_tables), UNSIGNED) AS created_tmp_disk_tables,
            CONVERT(SUM(sum_created_tmp_tables), UNSIGNED) AS created_tmp_tables,
            plugin AS plugin
        FROM
            performance_schema.users u
            JOIN performance_schema.events_statements_summary_by_user_by_event_name ess ON u.user = ess.user
            JOIN mysql.user mysql_user ON mysql_user.user = u.user
        WHERE
            current_connections != 0
        GROUP BY
            user
        ORDER BY
            current_connections DESC
    "#;

    pub const MEMORY_BY_USER: &str = r#"
        SELECT
            user,
            current_allocated,
            total_allocated
        FROM
            sys.memory_by_user_by_current_bytes
        WHERE
            user != "background"
    "#;

    pub const MEMORY_BY_HOST: &str = r#"
        SELECT
            host,
            current_allocated,
            total_allocated
        FROM
            sys.memory_by_host_by_current_bytes
        WHERE
            host != "background"
    "#;

    pub const MEMORY_BY_CODE_AREA: &str = r#"
        SELECT
            SUBSTRING_INDEX( event_name, '/', 2 ) AS code_area,
            sys.format_bytes( SUM(current_alloc) ) AS current_allocated
        FROM
            sys.x$memory_global_by_current_bytes
        GROUP BY
            SUBSTRING_INDEX( event_name, '/', 2 )
        ORDER BY
            SUM( current_alloc ) DESC
    "#;

    pub const TABLE_SIZES: &str = r#"
        SELECT
            TABLE_SCHEMA,
            TABLE_NAME,
            ENGINE,
            DATA_LENGTH,
            INDEX_LENGTH,
            DATA_LENGTH + INDEX_LENGTH AS total_size
        FROM
            information_schema.TABLES
        WHERE
            TABLE_SCHEMA NOT IN ('mysql', 'performance_schema', 'information_schema', 'sys')
        ORDER BY
            total_size DESC
        LIMIT
            50
    "#;

    pub const DETERMINE_CLUSTER_TYPE_81: &str = r#"
        SELECT
            instance_type,
            cluster_type
        FROM
            mysql_innodb_cluster_metadata.clusters
            JOIN mysql_innodb_cluster_metadata.instances USING ( cluster_id )
            LEFT JOIN mysql_innodb_cluster_metadata.clusterset_members USING ( cluster_id )
        WHERE
            mysql_server_uuid = @@server_uuid
        ORDER BY
            view_id DESC
            LIMIT 1
    "#;
}

pub mod proxysql {
    pub const VARIABLES: &str = "SHOW GLOBAL VARIABLES";

    pub const MYSQL_STATS: &str = r#"
        SELECT
            Variable_Name  AS Variable_name,
            Variable_Value AS Value
        FROM
            stats_mysql_global
    "#;

    pub const COMMAND_STATS: &str = r#"
        SELECT
            *,
            Total_cnt AS Total_cnt_s
        FROM
            stats_mysql_commands_counters
        WHERE
            Total_cnt != 0
        ORDER BY
            Total_cnt DESC
    "#;

    pub const CONNECTION_POOL_DATA: &str = r#"
        SELECT
            SUM(Latency_us) / COUNT(*) AS avg_latency,
            SUM(ConnUsed) AS connection_pool_connections
        FROM
            stats_mysql_connection_pool
    "#;

    pub const HOSTGROUP_SUMMARY: &str = r#"
        SELECT
            *
        FROM
            stats_mysql_connection_pool LEFT JOIN
            runtime_mysql_servers ON hostgroup = hostgroup_id AND srv_host = hostname AND srv_port = port
        ORDER BY
            hostgroup
    "#;

    pub const QUERY_RULES_SUMMARY: &str = r#"
        SELECT
            *,
            hits AS hits_s
        FROM
            stats_mysql_query_rules
            JOIN runtime_mysql_query_rules USING (rule_id)
        WHERE
            active = 1
        ORDER BY
            hits DESC
    "#;

    pub const PROCESSLIST: &str = r#"
        SELECT
            SessionID      AS id,
            user           AS user,
            db             AS db,
            cli_host       AS frontend_host,
            hostgroup      AS hostgroup,
            srv_host       AS backend_host,
            command        AS command,
            time_ms        AS time,
            info           AS query,
            extended_info  AS extended_info
        FROM
            stats_mysql_processlist
            $1
    "#;
}

/// Substitutes the `$1` predicate marker; an empty predicate collapses to
/// nothing so the query stays valid.
pub fn with_predicate(query: &str, predicate: &str) -> String {
    return query.replace("$1", predicate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_with_predicate_empty() {
        let sql = with_predicate(mysql::PS_PROCESSLIST, "");
        assert_eq!(sql.contains('$'), false);
    }

    #[test]
    fn test_with_predicate_filter() {
        let sql = with_predicate(mysql::PL_PROCESSLIST, "AND User = 'app'");
        assert!(sql.contains("AND User = 'app'"));
    }
}
