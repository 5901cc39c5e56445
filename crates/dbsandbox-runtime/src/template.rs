//! Built-in script templates.
//!
//! Templates are rendered with `tera` from a flat data map. Node templates
//! expect the per-node keys (`SandboxDir`, `Port`, `ServerId`, `Basedir`,
//! `ClientBasedir`, `DataDir`, `Socket`, credentials, ...); topology
//! templates expect `SandboxDir`, the `Nodes` list and whatever topology
//! keys they use (`MasterPort`, `Slaves`, `RplUser`, `ClusterPort`, ...).

use crate::RuntimeError;
use std::fs;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};

pub type TemplateData = serde_json::Map<String, serde_json::Value>;

const START: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
PIDFILE="$SBDIR/data/mysql_sandbox{{ Port }}.pid"
if [ -f "$PIDFILE" ] && kill -0 "$(cat "$PIDFILE")" 2>/dev/null; then
    echo "sandbox server already started"
    exit 0
fi
"{{ Basedir }}/bin/{{ Mysqld }}" --defaults-file="$SBDIR/my.sandbox.cnf" "$@" > "$SBDIR/data/msandbox.err" 2>&1 &
ATTEMPTS=0
while [ ! -f "$PIDFILE" ]; do
    ATTEMPTS=$((ATTEMPTS + 1))
    if [ $ATTEMPTS -gt 180 ]; then
        echo "server did not start; see $SBDIR/data/msandbox.err" >&2
        exit 1
    fi
    sleep 1
done
echo "sandbox server started"
"##;

const STOP: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
PIDFILE="$SBDIR/data/mysql_sandbox{{ Port }}.pid"
if [ ! -f "$PIDFILE" ]; then
    echo "sandbox server not running"
    exit 0
fi
"{{ ClientBasedir }}/bin/mysqladmin" --defaults-file="$SBDIR/my.sandbox.cnf" -u root shutdown
ATTEMPTS=0
while [ -f "$PIDFILE" ] && [ $ATTEMPTS -lt 60 ]; do
    ATTEMPTS=$((ATTEMPTS + 1))
    sleep 1
done
if [ -f "$PIDFILE" ]; then
    "$SBDIR/send_kill"
fi
echo "sandbox server stopped"
"##;

const STATUS: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
PIDFILE="$SBDIR/data/mysql_sandbox{{ Port }}.pid"
if [ -f "$PIDFILE" ] && kill -0 "$(cat "$PIDFILE")" 2>/dev/null; then
    echo "{{ SandboxName }} on  -  port {{ Port }} ($(cat "$PIDFILE"))"
    exit 0
fi
echo "{{ SandboxName }} off"
exit 1
"##;

const RESTART: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
"$SBDIR/stop"
"$SBDIR/start" "$@"
"##;

const CLEAR: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
"$SBDIR/stop"
rm -rf "$SBDIR/data"
mkdir -p "$SBDIR/data"
"$SBDIR/init_db"
"##;

const USE: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
exec "{{ ClientBasedir }}/bin/mysql" --defaults-file="$SBDIR/my.sandbox.cnf" "$@"
"##;

const SEND_KILL: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
PIDFILE="$SBDIR/data/mysql_sandbox{{ Port }}.pid"
if [ -f "$PIDFILE" ]; then
    kill -9 "$(cat "$PIDFILE")" 2>/dev/null
    rm -f "$PIDFILE"
fi
"##;

const LOAD_GRANTS: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
run_sql() {
    "{{ ClientBasedir }}/bin/mysql" --no-defaults --socket={{ Socket }} --port={{ Port }} -u root "$@"
}
if [ -f "$SBDIR/pre_grants.sql" ]; then
    run_sql < "$SBDIR/pre_grants.sql" || exit 1
fi
run_sql < "$SBDIR/grants.mysql" || exit 1
if [ -f "$SBDIR/post_grants.sql" ]; then
    run_sql -p'{{ DbPassword }}' < "$SBDIR/post_grants.sql" || exit 1
fi
"##;

const MY: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
exec "{{ ClientBasedir }}/bin/my_print_defaults" --defaults-file="$SBDIR/my.sandbox.cnf" "${@:-mysqld}"
"##;

const SHOW_BINLOG: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
LOG=$(ls "$SBDIR"/data/*-bin.[0-9]* 2>/dev/null | tail -n 1)
if [ -z "$LOG" ]; then
    echo "no binary log found in $SBDIR/data"
    exit 1
fi
"{{ ClientBasedir }}/bin/mysqlbinlog" "$@" "$LOG"
"##;

const SHOW_RELAYLOG: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
LOG=$(ls "$SBDIR"/data/*-relay-bin.[0-9]* 2>/dev/null | tail -n 1)
if [ -z "$LOG" ]; then
    echo "no relay log found in $SBDIR/data"
    exit 1
fi
"{{ ClientBasedir }}/bin/mysqlbinlog" "$@" "$LOG"
"##;

const ADD_OPTION: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
if [ $# -eq 0 ]; then
    echo "usage: add_option option[=value] ..." >&2
    exit 1
fi
for opt in "$@"; do
    echo "$opt" >> "$SBDIR/my.sandbox.cnf"
done
"$SBDIR/restart"
"##;

const TEST_SB: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
FAIL=0
check() {
    RESULT=$("$SBDIR/use" -BN -e "$1" 2>/dev/null)
    if [ "$RESULT" = "$2" ]; then
        echo "ok - $1"
    else
        echo "not ok - $1 (expected '$2', got '$RESULT')"
        FAIL=1
    fi
}
check "SELECT @@port" "{{ Port }}"
check "SELECT @@server_id" "{{ ServerId }}"
check "SELECT @@version LIKE '{{ Version }}%'" "1"
exit $FAIL
"##;

const INIT_DB: &str = r##"#!/bin/sh
set -e
SBDIR="{{ SandboxDir }}"
cd "$SBDIR"
{% if InitMethod == "installdb" -%}
"{{ InstallDb }}" --no-defaults --basedir="{{ Basedir }}" --datadir="{{ DataDir }}" --tmpdir="{{ TmpDir }}" {{ InitOptions | join(sep=" ") }}
{%- else -%}
"{{ Basedir }}/bin/{{ Mysqld }}" --no-defaults --initialize-insecure --basedir="{{ Basedir }}" --datadir="{{ DataDir }}" --tmpdir="{{ TmpDir }}" {{ InitOptions | join(sep=" ") }}
{%- endif %}
{% if ServerUuid -%}
printf '[auto]\nserver-uuid=%s\n' "{{ ServerUuid }}" > "{{ DataDir }}/auto.cnf"
{%- endif %}
"##;

const MY_SANDBOX_CNF: &str = r##"[mysql]
prompt='{{ Prompt }} [\h:{{ Port }}] {\U} (\d) > '

[client]
user = {{ DbUser }}
password = {{ DbPassword }}
port = {{ Port }}
socket = {{ Socket }}

[mysqld]
port = {{ Port }}
socket = {{ Socket }}
basedir = {{ Basedir }}
datadir = {{ DataDir }}
tmpdir = {{ TmpDir }}
pid-file = {{ DataDir }}/mysql_sandbox{{ Port }}.pid
bind-address = {{ BindAddress }}
server-id = {{ ServerId }}
{% if MysqlXPort -%}
mysqlx-port = {{ MysqlXPort }}
mysqlx-socket = /tmp/mysqlx-{{ MysqlXPort }}.sock
{% endif -%}
{% if AdminPort -%}
admin-address = 127.0.0.1
admin-port = {{ AdminPort }}
{% endif -%}
{% if NativeAuth -%}
default-authentication-plugin = mysql_native_password
{% endif -%}
{{ ReplOptions }}
{% for opt in MyCnfOptions -%}
{{ opt }}
{% endfor -%}
"##;

const GRANTS_5X: &str = r"use mysql;
set password=password('{{ DbPassword }}');
grant all on *.* to {{ DbUser }}@'{{ RemoteAccess }}' identified by '{{ DbPassword }}';
grant all on *.* to {{ DbUser }}@'localhost' identified by '{{ DbPassword }}';
grant replication slave on *.* to {{ RplUser }}@'{{ RemoteAccess }}' identified by '{{ RplPassword }}';
delete from user where password='';
delete from db where user='';
flush privileges;
";

const GRANTS_57: &str = r"use mysql;
set password='{{ DbPassword }}';
create user {{ DbUser }}@'{{ RemoteAccess }}' identified by '{{ DbPassword }}';
grant all on *.* to {{ DbUser }}@'{{ RemoteAccess }}';
create user {{ DbUser }}@'localhost' identified by '{{ DbPassword }}';
grant all on *.* to {{ DbUser }}@'localhost';
create user {{ RplUser }}@'{{ RemoteAccess }}' identified by '{{ RplPassword }}';
grant replication slave on *.* to {{ RplUser }}@'{{ RemoteAccess }}';
flush privileges;
";

const GRANTS_8X: &str = r"use mysql;
set password='{{ DbPassword }}';
create role if not exists R_DO_IT_ALL, R_REPLICATION;
grant all on *.* to R_DO_IT_ALL;
grant replication slave on *.* to R_REPLICATION;
create user {{ DbUser }}@'{{ RemoteAccess }}' identified {% if NativeAuth %}with mysql_native_password {% endif %}by '{{ DbPassword }}' default role R_DO_IT_ALL;
create user {{ DbUser }}@'localhost' identified {% if NativeAuth %}with mysql_native_password {% endif %}by '{{ DbPassword }}' default role R_DO_IT_ALL;
create user {{ RplUser }}@'{{ RemoteAccess }}' identified {% if NativeAuth %}with mysql_native_password {% endif %}by '{{ RplPassword }}' default role R_REPLICATION;
grant R_DO_IT_ALL to {{ DbUser }}@'{{ RemoteAccess }}';
grant R_DO_IT_ALL to {{ DbUser }}@'localhost';
grant R_REPLICATION to {{ RplUser }}@'{{ RemoteAccess }}';
flush privileges;
";

const START_ALL: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
{% for node in Nodes -%}
echo "# starting {{ node.NodeName }}"
"$SBDIR/{{ node.NodeName }}/start" "$@" || exit 1
{% endfor -%}
"##;

const STOP_ALL: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
{% for node in Nodes | reverse -%}
echo "# stopping {{ node.NodeName }}"
"$SBDIR/{{ node.NodeName }}/stop"
{% endfor -%}
"##;

const STATUS_ALL: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
RC=0
{% for node in Nodes -%}
"$SBDIR/{{ node.NodeName }}/status" || RC=1
{% endfor -%}
exit $RC
"##;

const RESTART_ALL: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
"$SBDIR/stop_all"
"$SBDIR/start_all" "$@"
"##;

const CLEAR_ALL: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
"$SBDIR/stop_all"
{% for node in Nodes -%}
"$SBDIR/{{ node.NodeName }}/clear"
{% endfor -%}
"##;

const SEND_KILL_ALL: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
{% for node in Nodes -%}
"$SBDIR/{{ node.NodeName }}/send_kill"
{% endfor -%}
"##;

const USE_ALL: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
if [ $# -eq 0 ]; then
    echo "usage: use_all 'SQL statement'" >&2
    exit 1
fi
{% for node in Nodes -%}
echo "# {{ node.NodeName }} ({{ node.Port }})"
"$SBDIR/{{ node.NodeName }}/use" -e "$@"
{% endfor -%}
"##;

const NODE_SHORTCUT: &str = r##"#!/bin/sh
exec "{{ SandboxDir }}/{{ NodeName }}/use" "$@"
"##;

const INITIALIZE_SLAVES: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
{% if Semisync -%}
"$SBDIR/{{ MasterName }}/use" -u root -e "INSTALL PLUGIN rpl_semi_sync_master SONAME 'semisync_master.so'; SET GLOBAL rpl_semi_sync_master_enabled=1" || exit 1
{% endif -%}
{% for slave in Slaves -%}
echo "# initializing {{ slave.NodeName }}"
{% if Semisync -%}
"$SBDIR/{{ slave.NodeName }}/use" -u root -e "INSTALL PLUGIN rpl_semi_sync_slave SONAME 'semisync_slave.so'; SET GLOBAL rpl_semi_sync_slave_enabled=1" || exit 1
{% endif -%}
"$SBDIR/{{ slave.NodeName }}/use" -u root -e "CHANGE MASTER TO master_host='127.0.0.1', master_port={{ MasterPort }}, master_user='{{ RplUser }}', master_password='{{ RplPassword }}'{% if ChangeMasterExtra %}, {{ ChangeMasterExtra }}{% endif %}" || exit 1
"$SBDIR/{{ slave.NodeName }}/use" -u root -e "START SLAVE" || exit 1
{% endfor -%}
"##;

const CHECK_SLAVES: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
echo "# master"
"$SBDIR/{{ MasterName }}/use" -e "SHOW MASTER STATUS\G" | grep -E 'File|Position|Executed_Gtid_Set'
{% for slave in Slaves -%}
echo "# {{ slave.NodeName }}"
"$SBDIR/{{ slave.NodeName }}/use" -e "SHOW SLAVE STATUS\G" | grep -E 'Running:|Master_Log_File|Exec_Master_Log_Pos'
{% endfor -%}
"##;

const GROUP_INITIALIZE_NODES: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
{% for node in Nodes -%}
"$SBDIR/{{ node.NodeName }}/use" -u root -e "CHANGE MASTER TO master_user='{{ RplUser }}', master_password='{{ RplPassword }}' FOR CHANNEL 'group_replication_recovery'" || exit 1
{% endfor -%}
{% for node in Nodes -%}
{% if loop.first -%}
echo "# bootstrapping group on {{ node.NodeName }}"
"$SBDIR/{{ node.NodeName }}/use" -u root -e "SET GLOBAL group_replication_bootstrap_group=ON; START GROUP_REPLICATION; SET GLOBAL group_replication_bootstrap_group=OFF" || exit 1
{% else -%}
sleep 1
echo "# joining {{ node.NodeName }}"
"$SBDIR/{{ node.NodeName }}/use" -u root -e "START GROUP_REPLICATION" || exit 1
{% endif -%}
{% endfor -%}
"##;

const GROUP_CHECK_NODES: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
{% for node in Nodes -%}
echo "# {{ node.NodeName }}"
"$SBDIR/{{ node.NodeName }}/use" -e "SELECT member_host, member_port, member_state, member_role FROM performance_schema.replication_group_members"
{% endfor -%}
"##;

const MS_INITIALIZE_NODES: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
{% for slave in Slaves -%}
echo "# wiring {{ slave.NodeName }}"
{% for master in slave.Masters -%}
"$SBDIR/{{ slave.NodeName }}/use" -u root -e "CHANGE MASTER TO master_host='127.0.0.1', master_port={{ master.Port }}, master_user='{{ RplUser }}', master_password='{{ RplPassword }}'{% if ChangeMasterExtra %}, {{ ChangeMasterExtra }}{% endif %} FOR CHANNEL '{{ master.NodeName }}'" || exit 1
{% endfor -%}
"$SBDIR/{{ slave.NodeName }}/use" -u root -e "START SLAVE" || exit 1
{% endfor -%}
"##;

const MS_CHECK_NODES: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
{% for slave in Slaves -%}
echo "# {{ slave.NodeName }}"
"$SBDIR/{{ slave.NodeName }}/use" -e "SHOW SLAVE STATUS\G" | grep -E 'Channel_Name|Running:'
{% endfor -%}
"##;

const NDB_CONFIG: &str = r"[ndbd default]
NoOfReplicas={{ Replicas }}
DataMemory=80M

[ndb_mgmd]
NodeId=1
HostName=127.0.0.1
PortNumber={{ ClusterPort }}
DataDir={{ SandboxDir }}/ndb
{% for node in NdbNodes %}
[ndbd]
NodeId={{ node.NodeId }}
HostName=127.0.0.1
DataDir={{ SandboxDir }}/{{ node.NodeName }}
{% endfor -%}
{% for node in Nodes %}
[mysqld]
NodeId={{ node.NodeId }}
HostName=127.0.0.1
{% endfor -%}
";

const NDB_INITIALIZE_NODES: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
echo "# starting management node"
"{{ Basedir }}/bin/ndb_mgmd" --config-file="$SBDIR/ndb/config.ini" --configdir="$SBDIR/ndb" --initial || exit 1
{% for node in NdbNodes -%}
echo "# starting {{ node.NodeName }}"
"{{ Basedir }}/bin/ndbd" --ndb-connectstring=127.0.0.1:{{ ClusterPort }} --ndb-nodeid={{ node.NodeId }} --initial || exit 1
{% endfor -%}
if [ -x "{{ Basedir }}/bin/ndb_waiter" ]; then
    "{{ Basedir }}/bin/ndb_waiter" --ndb-connectstring=127.0.0.1:{{ ClusterPort }} || exit 1
fi
{% for node in Nodes -%}
"$SBDIR/{{ node.NodeName }}/start" || exit 1
{% endfor -%}
{% for node in Nodes -%}
"$SBDIR/{{ node.NodeName }}/load_grants" || exit 1
{% endfor -%}
"##;

const NDB_CHECK_NODES: &str = r##"#!/bin/sh
"{{ Basedir }}/bin/ndb_mgm" --ndb-connectstring=127.0.0.1:{{ ClusterPort }} -e show
"##;

const NDB_STOP_CLUSTER: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
"$SBDIR/stop_all"
"{{ Basedir }}/bin/ndb_mgm" --ndb-connectstring=127.0.0.1:{{ ClusterPort }} -e shutdown
"##;

const PXC_CHECK_NODES: &str = r##"#!/bin/sh
SBDIR="{{ SandboxDir }}"
{% for node in Nodes -%}
echo "# {{ node.NodeName }}"
"$SBDIR/{{ node.NodeName }}/use" -BN -e "SHOW STATUS WHERE Variable_name IN ('wsrep_cluster_size', 'wsrep_local_state_comment', 'wsrep_ready')"
{% endfor -%}
"##;

const BUILTIN: &[(&str, &str)] = &[
    ("start", START),
    ("stop", STOP),
    ("status", STATUS),
    ("restart", RESTART),
    ("clear", CLEAR),
    ("use", USE),
    ("send_kill", SEND_KILL),
    ("load_grants", LOAD_GRANTS),
    ("my", MY),
    ("show_binlog", SHOW_BINLOG),
    ("show_relaylog", SHOW_RELAYLOG),
    ("add_option", ADD_OPTION),
    ("test_sb", TEST_SB),
    ("init_db", INIT_DB),
    ("my.sandbox.cnf", MY_SANDBOX_CNF),
    ("grants_5x", GRANTS_5X),
    ("grants_57", GRANTS_57),
    ("grants_8x", GRANTS_8X),
    ("start_all", START_ALL),
    ("stop_all", STOP_ALL),
    ("status_all", STATUS_ALL),
    ("restart_all", RESTART_ALL),
    ("clear_all", CLEAR_ALL),
    ("send_kill_all", SEND_KILL_ALL),
    ("use_all", USE_ALL),
    ("node_shortcut", NODE_SHORTCUT),
    ("initialize_slaves", INITIALIZE_SLAVES),
    ("check_slaves", CHECK_SLAVES),
    ("group_initialize_nodes", GROUP_INITIALIZE_NODES),
    ("group_check_nodes", GROUP_CHECK_NODES),
    ("ms_initialize_nodes", MS_INITIALIZE_NODES),
    ("ms_check_nodes", MS_CHECK_NODES),
    ("ndb_config", NDB_CONFIG),
    ("ndb_initialize_nodes", NDB_INITIALIZE_NODES),
    ("ndb_check_nodes", NDB_CHECK_NODES),
    ("ndb_stop_cluster", NDB_STOP_CLUSTER),
    ("pxc_check_nodes", PXC_CHECK_NODES),
];

/// Immutable set of named templates, built once per process.
pub struct TemplateCollection {
    tera: Tera,
}

impl TemplateCollection {
    pub fn builtin() -> Result<Self, RuntimeError> {
        let mut tera = Tera::default();
        tera.autoescape_on(Vec::new());
        tera.add_raw_templates(BUILTIN.iter().copied())?;
        Ok(Self { tera })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tera.get_template_names().collect();
        names.sort_unstable();
        names
    }

    pub fn render(&self, name: &str, data: &TemplateData) -> Result<String, RuntimeError> {
        if !self.contains(name) {
            return Err(RuntimeError::UnknownTemplate(name.to_owned()));
        }
        let mut ctx = Context::new();
        for (key, value) in data {
            ctx.insert(key.as_str(), value);
        }
        Ok(self.tera.render(name, &ctx)?)
    }
}

/// Write a rendered script into `dir`, marking it executable when asked.
pub fn write_script(
    dir: &Path,
    file_name: &str,
    content: &str,
    executable: bool,
) -> Result<PathBuf, RuntimeError> {
    let path = dir.join(file_name);
    fs::write(&path, content)?;
    if executable {
        set_executable(&path)?;
    }
    Ok(path)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), RuntimeError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), RuntimeError> {
    Ok(())
}
